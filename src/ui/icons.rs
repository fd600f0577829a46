/// Plain symbols that keep their width in tables and piped output
pub struct Icons;

impl Icons {
    pub const OK: &str = "✔";
    pub const FAILED: &str = "✖";
    pub const WARN: &str = "▲";
    pub const FIELD: &str = "›";
    pub const DATABASE: &str = "◆";
}
