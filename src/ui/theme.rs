//! Prompt and spinner colors

use cliclack::ThemeState;
use console::Style;

/// Blue while working, green once done, red on failure
#[derive(Debug, Clone, Default)]
pub struct DepcacheTheme;

impl cliclack::Theme for DepcacheTheme {
    fn bar_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().blue(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().green().dim(),
        }
    }

    fn state_symbol_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().blue().bold(),
            ThemeState::Error(_) => Style::new().red().bold(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().green(),
        }
    }
}

/// Install the theme for every cliclack widget in this process
pub fn init_theme() {
    cliclack::set_theme(DepcacheTheme);
}

#[cfg(test)]
mod tests {
    use super::*;
    use cliclack::Theme;

    #[test]
    fn error_state_is_red() {
        let theme = DepcacheTheme;
        let error = ThemeState::Error("boom".to_string());
        assert_eq!(
            theme.bar_color(&error).apply_to("x").to_string(),
            Style::new().red().apply_to("x").to_string()
        );
        assert_eq!(
            theme.state_symbol_color(&ThemeState::Submit).apply_to("x").to_string(),
            Style::new().green().apply_to("x").to_string()
        );
    }
}
