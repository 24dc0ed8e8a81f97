use crate::Fragment;
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};
use syntect::{
    easy::HighlightLines,
    highlighting::{Color as SyntectColor, Theme, ThemeSet},
    parsing::SyntaxSet,
};

pub const DEFAULT_THEME: &str = "base16-ocean.dark";

/// Lines longer than this are only colored by their diff marker.
const MAX_HIGHLIGHT_LEN: usize = 10_000;

/// Syntax highlighting for fragment previews in the plan editor.
///
/// Loading the bundled syntaxes and themes is slow, so build one per session.
pub struct Highlighter {
    syntax_set: SyntaxSet,
    theme: Theme,
}

impl Highlighter {
    /// Use the named bundled theme. Unknown names fall back to the default
    /// theme and report the fallback in the returned flag.
    pub fn with_theme(name: &str) -> (Self, bool) {
        let syntax_set = SyntaxSet::load_defaults_newlines();
        let mut themes = ThemeSet::load_defaults().themes;
        let found = themes.contains_key(name);
        let mut theme = themes.remove(name);
        if theme.is_none() {
            theme = themes.remove(DEFAULT_THEME);
        }
        let theme = theme
            .or_else(|| themes.into_values().next())
            .unwrap_or_default();
        (Self { syntax_set, theme }, found)
    }

    pub fn theme_names() -> Vec<String> {
        ThemeSet::load_defaults().themes.into_keys().collect()
    }

    /// Render a fragment as styled lines: its `@@` header, then the body.
    ///
    /// Parse state carries across lines so multi-line constructs stay intact.
    pub fn fragment_lines(&self, fragment: &Fragment) -> Vec<Line<'static>> {
        let ext = fragment
            .file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let mut state = self
            .syntax_set
            .find_syntax_by_extension(ext)
            .map(|syntax| HighlightLines::new(syntax, &self.theme));

        let mut lines = vec![Line::from(Span::styled(
            fragment.header(),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))];
        for line in fragment.body_lines() {
            lines.push(Line::from(self.diff_line(state.as_mut(), &line)));
        }
        lines
    }

    fn diff_line(&self, state: Option<&mut HighlightLines<'_>>, line: &str) -> Vec<Span<'static>> {
        let marker_color = match line.as_bytes().first() {
            Some(b'+') => Color::Green,
            Some(b'-') => Color::Red,
            Some(b' ') => Color::Reset,
            Some(_) => {
                return vec![Span::styled(
                    line.to_string(),
                    Style::default().fg(Color::DarkGray),
                )];
            }
            None => return vec![Span::raw(String::new())],
        };
        let plain = || vec![Span::styled(line.to_string(), Style::default().fg(marker_color))];

        let Some(state) = state else { return plain() };
        if line.len() > MAX_HIGHLIGHT_LEN {
            return plain();
        }

        let (marker, code) = line.split_at(1);
        match state.highlight_line(code, &self.syntax_set) {
            Ok(regions) => std::iter::once(Span::styled(
                marker.to_string(),
                Style::default().fg(marker_color),
            ))
            .chain(regions.into_iter().map(|(style, text)| {
                Span::styled(text.to_string(), Style::default().fg(rgb(style.foreground)))
            }))
            .collect(),
            Err(_) => plain(),
        }
    }
}

fn rgb(color: SyntectColor) -> Color {
    Color::Rgb(color.r, color.g, color.b)
}
