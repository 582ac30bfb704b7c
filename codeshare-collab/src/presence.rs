//! Presence: who is here, what they look at, where their cursor is.
//!
//! Presence is ephemeral. It rides the transport as `Awareness` frames and is
//! never written to the replicated document.
//!
//! ```text
//! update_user(patch)
//!       │
//!       ▼
//! PresenceRoom::update_local()  ──►  AwarenessMessage::Update  ──► peers
//!                                                                   │
//! collaborators()  ◄──  PresenceRoom::handle_message(connection, …) ◄┘
//! ```
//!
//! Entries are held per connection but the collaborator list is keyed by the
//! stable user id, so a user whose old connection has not timed out yet is
//! still listed once.

use std::collections::HashMap;

use codeshare_core::ItemId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::ProtocolError;

// ───────────────────────────────────────────────────────────────────
// Core types
// ───────────────────────────────────────────────────────────────────

/// RGBA color used for a collaborator's cursor and avatar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl CursorColor {
    /// Stable, visually distinct color for a user id.
    ///
    /// The hue comes from an FNV-1a hash of the id so every peer derives the
    /// same color for the same user.
    pub fn from_user(user_id: &str) -> Self {
        let hash = user_id
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
                (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
            });
        let hue = ((hash % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b, a: 1.0 }
    }

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// `#rrggbb`, alpha dropped.
    pub fn to_hex(&self) -> String {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!(
            "#{:02x}{:02x}{:02x}",
            channel(self.r),
            channel(self.g),
            channel(self.b)
        )
    }
}

impl Default for CursorColor {
    fn default() -> Self {
        Self { r: 0.26, g: 0.52, b: 0.96, a: 1.0 }
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Zero-based caret position in the focused file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub line: u32,
    pub column: u32,
}

impl Cursor {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// One participant as seen by everyone else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Stable across reconnects.
    pub user_id: String,
    pub name: String,
    pub color: CursorColor,
    pub avatar: char,
    pub current_file: Option<ItemId>,
    pub cursor: Cursor,
    pub is_host: bool,
}

/// First letter of the name, uppercased.
pub fn avatar_for(name: &str) -> char {
    name.trim()
        .chars()
        .next()
        .and_then(|c| c.to_uppercase().next())
        .unwrap_or('?')
}

impl PresenceRecord {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, is_host: bool) -> Self {
        let user_id = user_id.into();
        let name = name.into();
        Self {
            color: CursorColor::from_user(&user_id),
            avatar: avatar_for(&name),
            user_id,
            name,
            current_file: None,
            cursor: Cursor::default(),
            is_host,
        }
    }
}

/// Partial update of the local presence. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresencePatch {
    pub name: Option<String>,
    pub current_file: Option<Option<ItemId>>,
    pub cursor: Option<Cursor>,
}

impl PresencePatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn focus(file: Option<ItemId>, cursor: Cursor) -> Self {
        Self {
            current_file: Some(file),
            cursor: Some(cursor),
            ..Default::default()
        }
    }

    /// Merge into `record`. Returns true if the name changed.
    pub fn apply(self, record: &mut PresenceRecord) -> bool {
        let mut renamed = false;
        if let Some(name) = self.name {
            if name != record.name {
                record.avatar = avatar_for(&name);
                record.name = name;
                renamed = true;
            }
        }
        if let Some(file) = self.current_file {
            record.current_file = file;
        }
        if let Some(cursor) = self.cursor {
            record.cursor = cursor;
        }
        renamed
    }
}

// ───────────────────────────────────────────────────────────────────
// Wire protocol messages
// ───────────────────────────────────────────────────────────────────

/// Carried in `SyncMessage` payloads of type `Awareness`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AwarenessMessage {
    /// Full presence state of the sending connection.
    Update(PresenceRecord),

    /// Clean departure.
    Leave { user_id: String },

    /// Ask every peer to resend its presence.
    Query,
}

impl AwarenessMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

// ───────────────────────────────────────────────────────────────────
// Room state
// ───────────────────────────────────────────────────────────────────

struct PeerPresence {
    record: PresenceRecord,
    seen: u64,
}

/// Local presence plus the last known presence of every remote connection.
pub struct PresenceRoom {
    local_connection: Uuid,
    local: PresenceRecord,
    peers: HashMap<Uuid, PeerPresence>,
    seq: u64,
}

impl PresenceRoom {
    pub fn new(local_connection: Uuid, local: PresenceRecord) -> Self {
        Self {
            local_connection,
            local,
            peers: HashMap::new(),
            seq: 0,
        }
    }

    pub fn local(&self) -> &PresenceRecord {
        &self.local
    }

    pub fn local_connection(&self) -> Uuid {
        self.local_connection
    }

    /// Merge a patch into the local record. Returns true if the name changed.
    pub fn update_local(&mut self, patch: PresencePatch) -> bool {
        patch.apply(&mut self.local)
    }

    pub fn update_message(&self) -> AwarenessMessage {
        AwarenessMessage::Update(self.local.clone())
    }

    /// Apply a message from `connection`. Returns true if the room changed.
    pub fn handle_message(&mut self, connection: Uuid, msg: &AwarenessMessage) -> bool {
        if connection == self.local_connection {
            return false;
        }
        match msg {
            AwarenessMessage::Update(record) => {
                self.seq += 1;
                let entry = PeerPresence {
                    record: record.clone(),
                    seen: self.seq,
                };
                match self.peers.insert(connection, entry) {
                    Some(previous) => previous.record != *record,
                    None => true,
                }
            }
            AwarenessMessage::Leave { user_id } => {
                let before = self.peers.len();
                self.peers
                    .retain(|conn, p| !(*conn == connection && p.record.user_id == *user_id));
                before != self.peers.len()
            }
            AwarenessMessage::Query => false,
        }
    }

    /// Forget a connection the transport reported gone.
    pub fn remove_connection(&mut self, connection: &Uuid) -> bool {
        self.peers.remove(connection).is_some()
    }

    /// Whether any remote connection claims to be the host.
    pub fn has_host(&self) -> bool {
        self.peers.values().any(|p| p.record.is_host)
    }

    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    /// Everyone in the room, one entry per user id, local user first.
    ///
    /// When a user has several connections the most recently heard one wins.
    /// Calling this repeatedly on the same state yields the same list.
    pub fn collaborators(&self) -> Vec<PresenceRecord> {
        let mut latest: HashMap<&str, &PeerPresence> = HashMap::new();
        for peer in self.peers.values() {
            if peer.record.user_id == self.local.user_id {
                continue;
            }
            latest
                .entry(peer.record.user_id.as_str())
                .and_modify(|current| {
                    if peer.seen > current.seen {
                        *current = peer;
                    }
                })
                .or_insert(peer);
        }

        let mut remote: Vec<PresenceRecord> =
            latest.into_values().map(|p| p.record.clone()).collect();
        remote.sort_by(|a, b| {
            b.is_host
                .cmp(&a.is_host)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        let mut all = Vec::with_capacity(remote.len() + 1);
        all.push(self.local.clone());
        all.extend(remote);
        all
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(user: &str, host: bool) -> PresenceRoom {
        PresenceRoom::new(Uuid::new_v4(), PresenceRecord::new(user, user, host))
    }

    #[test]
    fn test_color_is_stable_per_user() {
        assert_eq!(CursorColor::from_user("u-1"), CursorColor::from_user("u-1"));
        let c = CursorColor::from_user("u-2");
        assert!(c.r >= 0.0 && c.r <= 1.0);
        assert_eq!(c.a, 1.0);
        assert_eq!(CursorColor::rgba(1.0, 0.0, 0.0, 1.0).to_hex(), "#ff0000");
    }

    #[test]
    fn test_hsl_to_rgb_red() {
        let (r, g, b) = hsl_to_rgb(0.0, 1.0, 0.5);
        assert!((r - 1.0).abs() < 0.01);
        assert!(g.abs() < 0.01);
        assert!(b.abs() < 0.01);
    }

    #[test]
    fn test_avatar_glyph() {
        assert_eq!(avatar_for("alice"), 'A');
        assert_eq!(avatar_for("  émile"), 'É');
        assert_eq!(avatar_for(""), '?');
    }

    #[test]
    fn test_awareness_roundtrip() {
        let mut record = PresenceRecord::new("u-1", "Alice", true);
        record.cursor = Cursor::new(3, 7);
        let msg = AwarenessMessage::Update(record);
        assert_eq!(AwarenessMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
        assert!(AwarenessMessage::decode(&[0xff, 0xff]).is_err());
    }

    #[test]
    fn test_patch_renames_and_moves_cursor() {
        let mut room = room("u-1", true);
        let file = Uuid::new_v4();

        assert!(!room.update_local(PresencePatch::focus(Some(file), Cursor::new(1, 2))));
        assert!(room.update_local(PresencePatch::name("bob")));
        assert!(!room.update_local(PresencePatch::name("bob")));

        let local = room.local();
        assert_eq!(local.avatar, 'B');
        assert_eq!(local.current_file, Some(file));
        assert_eq!(local.cursor, Cursor::new(1, 2));
    }

    #[test]
    fn test_reconnect_is_one_collaborator() {
        let mut room = room("u-host", true);
        let (old, new) = (Uuid::new_v4(), Uuid::new_v4());
        let mut bob = PresenceRecord::new("u-bob", "Bob", false);

        room.handle_message(old, &AwarenessMessage::Update(bob.clone()));
        bob.cursor = Cursor::new(9, 0);
        room.handle_message(new, &AwarenessMessage::Update(bob.clone()));

        let all = room.collaborators();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].user_id, "u-host");
        assert_eq!(all[1].cursor, Cursor::new(9, 0));
        assert_eq!(room.collaborators(), all);
        assert_eq!(room.connection_count(), 2);
    }

    #[test]
    fn test_own_connection_and_leave() {
        let mut room = room("u-1", false);
        let own = room.local_connection();
        let host = Uuid::new_v4();
        let host_record = PresenceRecord::new("u-h", "Host", true);

        assert!(!room.handle_message(own, &AwarenessMessage::Update(host_record.clone())));
        assert!(!room.has_host());

        assert!(room.handle_message(host, &AwarenessMessage::Update(host_record.clone())));
        assert!(!room.handle_message(host, &AwarenessMessage::Update(host_record)));
        assert!(room.has_host());

        assert!(room.handle_message(
            host,
            &AwarenessMessage::Leave {
                user_id: "u-h".into()
            }
        ));
        assert!(!room.has_host());
        assert!(!room.remove_connection(&host));
    }
}
