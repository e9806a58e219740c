use crate::controller::Phase;
use std::{fmt, io::Write};

pub const PLACEHOLDER: &str = "Nothing yet";

pub fn display_percent(frac: f32) -> String {
    format!("{:.2}%", frac * 100.0)
}

/// What the user sees, derived entirely from controller state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub control_label: String,
    pub control_enabled: bool,
    pub output: String,
}

impl View {
    pub fn new(phase: &Phase, output: Option<&str>) -> Self {
        let output = output.unwrap_or(PLACEHOLDER).to_string();
        match phase {
            Phase::Loading { progress } => Self {
                control_label: display_percent(*progress),
                control_enabled: false,
                output,
            },
            Phase::Ready => Self {
                control_label: "Predict".to_string(),
                control_enabled: true,
                output,
            },
            Phase::Predicting { .. } => Self {
                control_label: "Predicting...".to_string(),
                control_enabled: false,
                output,
            },
            Phase::Unavailable { reason } => Self {
                control_label: "Not ready".to_string(),
                control_enabled: false,
                output: format!("Model unavailable: {}", reason),
            },
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.control_enabled {
            ""
        } else {
            " (disabled)"
        };
        writeln!(f, "[ {} ]{}", self.control_label, state)?;
        write!(f, "{}", self.output)
    }
}

pub trait Renderer {
    fn render(&mut self, view: &View);
}

/// Writes the view to a terminal, skipping redraws when nothing changed.
pub struct TerminalRenderer<W: Write> {
    out: W,
    last: Option<View>,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, last: None }
    }
}

impl<W: Write> Renderer for TerminalRenderer<W> {
    fn render(&mut self, view: &View) {
        if self.last.as_ref() == Some(view) {
            return;
        }
        if let Err(e) = writeln!(self.out, "{}", view).and_then(|_| self.out.flush()) {
            tracing::warn!("Failed to render view: {}", e);
        }
        self.last = Some(view.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loading_shows_percentage_and_disables_control() {
        let view = View::new(&Phase::Loading { progress: 0.4213 }, None);

        assert_eq!(view.control_label, "42.13%");
        assert!(!view.control_enabled);
        assert_eq!(view.output, PLACEHOLDER);
    }

    #[test]
    fn test_ready_shows_last_result() {
        let view = View::new(&Phase::Ready, Some("daisy : 80.00% \n"));

        assert_eq!(view.control_label, "Predict");
        assert!(view.control_enabled);
        assert_eq!(view.to_string(), "[ Predict ]\ndaisy : 80.00% \n");
    }

    #[test]
    fn test_unavailable_explains_why() {
        let view = View::new(
            &Phase::Unavailable {
                reason: "bad asset".to_string(),
            },
            None,
        );

        assert!(!view.control_enabled);
        assert_eq!(view.output, "Model unavailable: bad asset");
    }

    #[test]
    fn test_terminal_renderer_skips_unchanged_views() {
        let mut out = Vec::new();
        {
            let mut renderer = TerminalRenderer::new(&mut out);
            let view = View::new(&Phase::Ready, None);
            renderer.render(&view);
            renderer.render(&view);
        }

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[ Predict ]\nNothing yet\n"
        );
    }
}
