//! Starter content for new projects.

use codeshare_core::Item;

pub const EMPTY: &str = "empty";
pub const MOVE_PACKAGE: &str = "move-package";

pub fn available() -> &'static [&'static str] {
    &[EMPTY, MOVE_PACKAGE]
}

/// Items for `template`, or `None` if the template is unknown.
pub fn items(template: &str, project_name: &str) -> Option<Vec<Item>> {
    match template {
        EMPTY => Some(Vec::new()),
        MOVE_PACKAGE => Some(move_package(project_name)),
        _ => None,
    }
}

/// Lowercase identifier usable as a Move package/address name.
fn package_ident(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, 'p');
    }
    ident
}

fn move_package(project_name: &str) -> Vec<Item> {
    let ident = package_ident(project_name);
    let manifest = format!(
        "[package]\n\
         name = \"{ident}\"\n\
         edition = \"2024.beta\"\n\
         \n\
         [dependencies]\n\
         \n\
         [addresses]\n\
         {ident} = \"0x0\"\n"
    );
    let module = format!(
        "module {ident}::main {{\n\
         \x20   public fun hello(): u64 {{\n\
         \x20       42\n\
         \x20   }}\n\
         }}\n"
    );

    let sources = Item::folder(None, "sources");
    let main = Item::file(Some(sources.id()), "main.move", module);
    vec![Item::file(None, "Move.toml", manifest), sources, main]
}
