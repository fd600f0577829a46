use owo_colors::Style;
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

/// Styles for CLI status lines. Query results are never styled so that
/// `--json` and piped tables stay byte-clean.
#[derive(Debug, Clone)]
pub struct Theme {
    /// Database path and result headings
    pub database: Style,
    pub ok: Style,
    pub failed: Style,
    pub warn: Style,
    /// Keys in `key: value` lines
    pub field: Style,
    /// Row counts and empty-result notes
    pub muted: Style,
}

impl Theme {
    /// Colored only on a terminal that has not opted out (`NO_COLOR`, `CLICOLOR=0`)
    pub fn detect() -> Self {
        if console::Term::stdout().is_term() && console::colors_enabled() {
            Self::colored()
        } else {
            Self::plain()
        }
    }

    pub fn colored() -> Self {
        Self {
            database: Style::new().blue().bold(),
            ok: Style::new().green(),
            failed: Style::new().red().bold(),
            warn: Style::new().yellow(),
            field: Style::new().cyan(),
            muted: Style::new().bright_black(),
        }
    }

    pub fn plain() -> Self {
        Self {
            database: Style::new(),
            ok: Style::new(),
            failed: Style::new(),
            warn: Style::new(),
            field: Style::new(),
            muted: Style::new(),
        }
    }
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::detect)
}
