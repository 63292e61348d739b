//! Detects whether output goes to a person or a pipeline

use std::io::IsTerminal;

/// CI systems that set a marker variable but may still allocate a TTY
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
    "JENKINS_URL",
    "TF_BUILD",
    "TEAMCITY_VERSION",
];

/// Decides between spinners and prompts or plain line output
#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
    /// `--yes`: prompts take their affirmative answer
    auto_yes: bool,
}

impl UiContext {
    /// Inspect the terminal and environment of this process
    pub fn detect() -> Self {
        let terminal = std::io::stderr().is_terminal() && std::io::stdin().is_terminal();
        let in_ci = CI_VARS.iter().any(|var| std::env::var_os(var).is_some());
        Self {
            interactive: terminal && !in_ci,
            auto_yes: false,
        }
    }

    /// Plain output, prompts answered with their defaults
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            auto_yes: false,
        }
    }

    pub fn with_auto_yes(mut self, yes: bool) -> Self {
        self.auto_yes = yes;
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn auto_yes(&self) -> bool {
        self.auto_yes
    }

    /// Spinners and cliclack log lines
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn non_interactive_context() {
        let ctx = UiContext::non_interactive().with_auto_yes(true);
        assert!(!ctx.is_interactive());
        assert!(!ctx.use_fancy_output());
        assert!(ctx.auto_yes());
    }

    #[test]
    #[serial]
    fn ci_marker_disables_interaction() {
        let previous = std::env::var_os("CI");
        std::env::set_var("CI", "true");
        let ctx = UiContext::detect();
        match previous {
            Some(value) => std::env::set_var("CI", value),
            None => std::env::remove_var("CI"),
        }
        assert!(!ctx.is_interactive());
    }
}
