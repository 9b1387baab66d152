use std::env;
use std::io::{self, IsTerminal, Stderr, Stdout, Write};

use nu_ansi_term::{Color, Style};
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use thiserror::Error;
use tracing::warn;

use crate::config::OutputMode;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// Turns answer text into terminal output.
pub trait Render {
    fn render(&self, text: &str, out: &mut dyn Write) -> Result<(), RenderError>;
}

/// Writes the text exactly as received.
pub struct PlainRenderer;

impl Render for PlainRenderer {
    fn render(&self, text: &str, out: &mut dyn Write) -> Result<(), RenderError> {
        writeln!(out, "{}", text)?;
        out.flush()?;
        Ok(())
    }
}

struct Theme {
    heading: Style,
    title: Style,
    emphasis: Style,
    strong: Style,
    strikethrough: Style,
    code: Style,
    code_block: Style,
    link: Style,
    url: Style,
    quote: Style,
    rule: Style,
    table_head: Style,
}

impl Theme {
    // Code uses the Monokai palette.
    fn ansi() -> Self {
        let monokai_bg = Color::Rgb(39, 40, 34);
        Theme {
            heading: Style::new().bold().fg(Color::Cyan),
            title: Style::new().bold().underline().fg(Color::Cyan),
            emphasis: Style::new().italic(),
            strong: Style::new().bold(),
            strikethrough: Style::new().strikethrough(),
            code: Style::new().fg(Color::Rgb(230, 219, 116)).on(monokai_bg),
            code_block: Style::new().fg(Color::Rgb(248, 248, 242)).on(monokai_bg),
            link: Style::new().underline().fg(Color::Blue),
            url: Style::new().dimmed(),
            quote: Style::new().fg(Color::DarkGray),
            rule: Style::new().fg(Color::DarkGray),
            table_head: Style::new().bold(),
        }
    }

    fn plain() -> Self {
        let none = Style::new();
        Theme {
            heading: none,
            title: none,
            emphasis: none,
            strong: none,
            strikethrough: none,
            code: none,
            code_block: none,
            link: none,
            url: none,
            quote: none,
            rule: none,
            table_head: none,
        }
    }
}

/// Renders Markdown with terminal styling: headings, emphasis, lists,
/// quotes, code, tables. With colour off the layout stays and the escape
/// codes go.
pub struct MarkdownRenderer {
    theme: Theme,
}

impl MarkdownRenderer {
    pub fn new(color: bool) -> Self {
        let theme = if color { Theme::ansi() } else { Theme::plain() };
        MarkdownRenderer { theme }
    }

    pub fn to_terminal(&self, text: &str) -> String {
        let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
        let mut writer = TerminalWriter::new(&self.theme);
        for event in Parser::new_ext(text, options) {
            writer.event(event);
        }
        writer.finish()
    }
}

impl Render for MarkdownRenderer {
    fn render(&self, text: &str, out: &mut dyn Write) -> Result<(), RenderError> {
        let rendered = self.to_terminal(text);
        out.write_all(rendered.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

const RULE_WIDTH: usize = 40;

struct TerminalWriter<'t> {
    theme: &'t Theme,
    buf: String,
    styles: Vec<Style>,
    // One entry per open list: the next number for ordered lists.
    lists: Vec<Option<u64>>,
    links: Vec<String>,
    quote_depth: usize,
    in_code_block: bool,
    table_cell: usize,
    line_start: bool,
    blank_pending: bool,
}

impl<'t> TerminalWriter<'t> {
    fn new(theme: &'t Theme) -> Self {
        TerminalWriter {
            theme,
            buf: String::new(),
            styles: Vec::new(),
            lists: Vec::new(),
            links: Vec::new(),
            quote_depth: 0,
            in_code_block: false,
            table_cell: 0,
            line_start: true,
            blank_pending: false,
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                if self.in_code_block {
                    self.code_text(&text);
                } else {
                    self.text(&text);
                }
            }
            Event::Code(code) => {
                self.prefix();
                let painted = self.theme.code.paint(code.as_ref()).to_string();
                self.buf.push_str(&painted);
            }
            Event::Html(html) | Event::InlineHtml(html) => self.text(&html),
            Event::InlineMath(math) | Event::DisplayMath(math) => self.text(&math),
            Event::FootnoteReference(label) => self.text(&format!("[^{}]", label)),
            Event::SoftBreak => self.text(" "),
            Event::HardBreak => self.newline(),
            Event::Rule => {
                self.start_block();
                self.prefix();
                let painted = self.theme.rule.paint("─".repeat(RULE_WIDTH)).to_string();
                self.buf.push_str(&painted);
                self.end_block();
            }
            Event::TaskListMarker(checked) => self.text(if checked { "[x] " } else { "[ ] " }),
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => self.start_block(),
            Tag::Heading { level, .. } => {
                self.start_block();
                let style = if level == HeadingLevel::H1 {
                    self.theme.title
                } else {
                    self.theme.heading
                };
                self.styles.push(style);
            }
            Tag::BlockQuote(_) => {
                self.start_block();
                self.quote_depth += 1;
            }
            Tag::CodeBlock(kind) => {
                self.start_block();
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() {
                        self.prefix();
                        let painted = self.theme.url.paint(lang.as_ref()).to_string();
                        self.buf.push_str(&painted);
                        self.newline();
                    }
                }
                self.in_code_block = true;
            }
            Tag::List(start) => {
                if self.lists.is_empty() {
                    self.start_block();
                } else if !self.line_start {
                    self.newline();
                }
                self.lists.push(start);
            }
            Tag::Item => self.item(),
            Tag::Table(_) | Tag::HtmlBlock => self.start_block(),
            Tag::TableHead => {
                self.table_cell = 0;
                self.styles.push(self.theme.table_head);
            }
            Tag::TableRow => {
                self.table_cell = 0;
                if !self.line_start {
                    self.newline();
                }
            }
            Tag::TableCell => {
                if self.table_cell > 0 {
                    self.text(" │ ");
                }
                self.table_cell += 1;
            }
            Tag::Emphasis => self.styles.push(self.theme.emphasis),
            Tag::Strong => self.styles.push(self.theme.strong),
            Tag::Strikethrough => self.styles.push(self.theme.strikethrough),
            Tag::Link { dest_url, .. } | Tag::Image { dest_url, .. } => {
                self.styles.push(self.theme.link);
                self.links.push(dest_url.into_string());
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph | TagEnd::Table | TagEnd::HtmlBlock => self.end_block(),
            TagEnd::Heading(_) => {
                self.styles.pop();
                self.end_block();
            }
            TagEnd::BlockQuote(_) => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.end_block();
            }
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                self.end_block();
            }
            TagEnd::List(_) => {
                self.lists.pop();
                if self.lists.is_empty() {
                    self.end_block();
                }
            }
            TagEnd::Item => {
                if !self.line_start {
                    self.newline();
                }
                // Loose items end with a paragraph; keep the list compact.
                self.blank_pending = false;
            }
            TagEnd::TableHead => {
                self.styles.pop();
                self.newline();
            }
            TagEnd::TableRow => self.newline(),
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => {
                self.styles.pop();
            }
            TagEnd::Link | TagEnd::Image => {
                self.styles.pop();
                if let Some(url) = self.links.pop() {
                    if !url.is_empty() {
                        let painted = self.theme.url.paint(format!(" ({})", url)).to_string();
                        self.buf.push_str(&painted);
                    }
                }
            }
            _ => {}
        }
    }

    fn item(&mut self) {
        if !self.line_start {
            self.newline();
        }
        self.blank_pending = false;

        let depth = self.lists.len().saturating_sub(1);
        self.bars();
        self.buf.push_str(&"  ".repeat(depth));
        let bullet = match self.lists.last_mut() {
            Some(Some(n)) => {
                let bullet = format!("{}. ", n);
                *n += 1;
                bullet
            }
            _ => "• ".to_string(),
        };
        self.buf.push_str(&bullet);
        self.line_start = false;
    }

    fn start_block(&mut self) {
        if self.blank_pending && !self.buf.is_empty() {
            if !self.line_start {
                self.newline();
            }
            self.bars();
            self.newline();
        }
        self.blank_pending = false;
    }

    fn end_block(&mut self) {
        if !self.line_start {
            self.newline();
        }
        self.blank_pending = true;
    }

    fn newline(&mut self) {
        // Drop trailing spaces a quote bar may have left on an empty line.
        let trimmed = self.buf.trim_end_matches(' ').len();
        self.buf.truncate(trimmed);
        self.buf.push('\n');
        self.line_start = true;
    }

    fn bars(&mut self) {
        for _ in 0..self.quote_depth {
            let painted = self.theme.quote.paint("│ ").to_string();
            self.buf.push_str(&painted);
        }
    }

    /// Starts a fresh line with quote bars and list indentation.
    fn prefix(&mut self) {
        if self.line_start {
            self.bars();
            self.buf.push_str(&"  ".repeat(self.lists.len()));
            self.line_start = false;
        }
    }

    fn current_style(&self) -> Style {
        let mut style = Style::new();
        for s in &self.styles {
            if s.foreground.is_some() {
                style.foreground = s.foreground;
            }
            if s.background.is_some() {
                style.background = s.background;
            }
            style.is_bold |= s.is_bold;
            style.is_italic |= s.is_italic;
            style.is_underline |= s.is_underline;
            style.is_dimmed |= s.is_dimmed;
            style.is_strikethrough |= s.is_strikethrough;
        }
        style
    }

    fn text(&mut self, text: &str) {
        let style = self.current_style();
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.newline();
            }
            if !line.is_empty() {
                self.prefix();
                let painted = style.paint(line).to_string();
                self.buf.push_str(&painted);
            }
        }
    }

    fn code_text(&mut self, text: &str) {
        for piece in text.split_inclusive('\n') {
            let (line, ends_line) = match piece.strip_suffix('\n') {
                Some(line) => (line, true),
                None => (piece, false),
            };
            if self.line_start {
                self.prefix();
                self.buf.push_str("    ");
            }
            let painted = self.theme.code_block.paint(line).to_string();
            self.buf.push_str(&painted);
            if ends_line {
                self.newline();
            }
        }
    }

    fn finish(mut self) -> String {
        let trimmed = self.buf.trim_end_matches('\n').len();
        self.buf.truncate(trimmed);
        self.buf.push('\n');
        self.buf
    }
}

/// Where everything `asky` prints goes: answers and confirmations on `out`,
/// diagnostics on `err`.
pub struct Console<O, E> {
    out: O,
    err: E,
    renderer: Box<dyn Render>,
    color: bool,
}

impl Console<Stdout, Stderr> {
    /// Console on the process streams. Colour needs a terminal on stdout and
    /// no `NO_COLOR` in the environment.
    pub fn stdio(mode: OutputMode) -> Self {
        let color = io::stdout().is_terminal() && env::var_os("NO_COLOR").is_none();
        Console::new(io::stdout(), io::stderr(), renderer_for(mode, color), color)
    }
}

pub fn renderer_for(mode: OutputMode, color: bool) -> Box<dyn Render> {
    match mode {
        OutputMode::Markdown => Box::new(MarkdownRenderer::new(color)),
        OutputMode::Plain => Box::new(PlainRenderer),
    }
}

impl<O: Write, E: Write> Console<O, E> {
    pub fn new(out: O, err: E, renderer: Box<dyn Render>, color: bool) -> Self {
        Console {
            out,
            err,
            renderer,
            color,
        }
    }

    fn paint(&self, style: Style, text: &str) -> String {
        if self.color {
            style.paint(text).to_string()
        } else {
            text.to_string()
        }
    }

    // Write failures on the console are ignored.
    pub fn print(&mut self, text: &str) {
        let _ = writeln!(self.out, "{}", text);
    }

    pub fn success(&mut self, text: &str) {
        let line = self.paint(Style::new().fg(Color::Green), text);
        self.print(&line);
    }

    pub fn notice(&mut self, text: &str) {
        let line = self.paint(Style::new().fg(Color::Yellow), text);
        self.print(&line);
    }

    pub fn error(&mut self, text: &str) {
        let line = self.paint(Style::new().fg(Color::Red), text);
        let _ = writeln!(self.err, "{}", line);
    }

    /// Shows an answer through the renderer, falling back to the raw text
    /// when rendering fails.
    pub fn display(&mut self, response: &str) {
        if let Err(e) = self.renderer.render(response, &mut self.out) {
            warn!(error = %e, "rendering failed, printing raw text");
            self.error(&format!("Error formatting response: {}", e));
            self.print(response);
        }
    }

    #[cfg(test)]
    pub fn out(&self) -> &O {
        &self.out
    }

    #[cfg(test)]
    pub fn err(&self) -> &E {
        &self.err
    }
}
