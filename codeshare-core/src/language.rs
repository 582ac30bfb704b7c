//! File-extension → editor language tag.

/// Fallback tag for unknown extensions.
pub const PLAINTEXT: &str = "plaintext";

/// Infer the language tag for a file name from its extension.
pub fn language_for(name: &str) -> &'static str {
    let ext = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => return PLAINTEXT,
    };

    match ext.as_str() {
        "move" => "move",
        "rs" => "rust",
        "toml" => "toml",
        "json" => "json",
        "md" | "markdown" => "markdown",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" => "javascript",
        "py" => "python",
        "sh" | "bash" => "shell",
        "yaml" | "yml" => "yaml",
        "html" | "htm" => "html",
        "css" => "css",
        "sol" => "solidity",
        _ => PLAINTEXT,
    }
}
