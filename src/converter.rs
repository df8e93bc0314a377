//! Built-in Markdown converters - transform a sanitized tree to Markdown
//!
//! Two lightweight, pure-function flavors are provided:
//!
//! - [`MarkdownFlavor::Gfm`]: ATX headings, fenced code, `*` emphasis and
//!   pipe tables
//! - [`MarkdownFlavor::CommonMark`]: the same block structure with `_`
//!   emphasis; tables are flattened to their cell text
//!
//! # Conversion Strategy
//!
//! The converter walks the tree depth-first in document order and writes
//! Markdown into a single buffer. Block elements make sure they are
//! separated from the previous block by a blank line; inline elements write
//! their markers around the converted children. The buffer is normalized at
//! the end so identical input always yields byte-identical output:
//!
//! 1. line endings are LF only
//! 2. trailing whitespace is removed from every line
//! 3. runs of blank lines collapse to one
//! 4. consecutive spaces collapse outside code
//! 5. the document ends with exactly one newline (or is empty)
//!
//! # Examples
//!
//! ```rust
//! use markpaste::converter::{MarkdownConverter, MarkdownFlavor};
//!
//! let converter = MarkdownConverter::new(MarkdownFlavor::Gfm);
//! let markdown = converter.convert_html("<h1>Title</h1><p>Some <em>content</em>.</p>");
//! assert_eq!(markdown, "# Title\n\nSome *content*.\n");
//! ```

use async_trait::async_trait;

use crate::backend::Converter;
use crate::error::ConversionError;
use crate::parser::{parse_body, to_node};
use crate::policy::{MAX_NESTING_DEPTH, Policy};
use crate::tree::{Element, Node};

/// Markdown flavor selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkdownFlavor {
    /// CommonMark baseline
    CommonMark,
    /// GitHub Flavored Markdown
    Gfm,
}

impl MarkdownFlavor {
    fn emphasis_delimiter(self) -> char {
        match self {
            MarkdownFlavor::Gfm => '*',
            MarkdownFlavor::CommonMark => '_',
        }
    }
}

/// Table column alignment (GFM)
#[derive(Debug, Clone, Copy)]
enum TableAlignment {
    Left,
    Center,
    Right,
}

/// DOM → Markdown converter
#[derive(Debug, Clone, Copy)]
pub struct MarkdownConverter {
    flavor: MarkdownFlavor,
    policy: &'static Policy,
}

impl MarkdownConverter {
    pub fn new(flavor: MarkdownFlavor) -> Self {
        Self {
            flavor,
            policy: Policy::publishing(),
        }
    }

    pub fn flavor(&self) -> MarkdownFlavor {
        self.flavor
    }

    /// Parse and convert an HTML string
    pub fn convert_html(&self, html: &str) -> String {
        self.convert_tree(&parse_body(html))
    }

    /// Convert an owned tree
    ///
    /// The root itself is treated as a container; only its children are
    /// rendered. Elements nested deeper than [`MAX_NESTING_DEPTH`] are
    /// rendered as plain text.
    pub fn convert_tree(&self, root: &Node) -> String {
        if root.depth() > MAX_NESTING_DEPTH {
            return self.convert_tree(&to_node(&root));
        }

        let mut output = String::with_capacity(1024);
        match root {
            Node::Element(element) => self.traverse_children(element, &mut output),
            Node::Text(_) => self.traverse(root, &mut output),
        }
        normalize_output(output)
    }

    fn traverse_children(&self, element: &Element, output: &mut String) {
        for child in &element.children {
            self.traverse(child, output);
        }
    }

    fn traverse(&self, node: &Node, output: &mut String) {
        match node {
            Node::Text(text) => {
                let normalized = normalize_text(text);
                if normalized.is_empty() {
                    // Whitespace between inline elements still separates words
                    if !text.is_empty()
                        && !output.is_empty()
                        && !output.ends_with([' ', '\n'])
                    {
                        output.push(' ');
                    }
                    return;
                }
                if text.starts_with(char::is_whitespace)
                    && !output.is_empty()
                    && !output.ends_with([' ', '\n'])
                {
                    output.push(' ');
                }
                output.push_str(&normalized);
                if text.ends_with(char::is_whitespace) {
                    output.push(' ');
                }
            }
            Node::Element(element) => self.handle_element(element, output),
        }
    }

    fn handle_element(&self, element: &Element, output: &mut String) {
        let tag = element.tag.to_ascii_lowercase();
        if self.policy.is_dangerous(&tag) {
            return;
        }

        match tag.as_str() {
            "h1" => self.handle_heading(element, 1, output),
            "h2" => self.handle_heading(element, 2, output),
            "h3" => self.handle_heading(element, 3, output),
            "h4" => self.handle_heading(element, 4, output),
            "h5" => self.handle_heading(element, 5, output),
            "h6" => self.handle_heading(element, 6, output),

            "p" | "dd" => self.handle_paragraph(element, output),
            "dt" => self.handle_term(element, output),
            "blockquote" => self.handle_blockquote(element, output),
            "hr" => {
                ensure_blank_line(output);
                output.push_str("---\n\n");
            }
            "br" => output.push_str("\\\n"),

            "a" => self.handle_link(element, output),
            "img" => self.handle_image(element, output),

            "ul" => self.handle_list(element, output, "", false),
            "ol" => self.handle_list(element, output, "", true),
            "li" => self.handle_list_item(element, output, "", "- "),

            "pre" => self.handle_code_block(element, output),
            "code" => self.handle_inline_code(element, output),

            "strong" | "b" => self.handle_emphasis(element, "**", output),
            "em" | "i" => {
                let delimiter = self.flavor.emphasis_delimiter().to_string();
                self.handle_emphasis(element, &delimiter, output);
            }

            "table" if self.flavor == MarkdownFlavor::Gfm => self.handle_table(element, output),
            "table" => {
                ensure_blank_line(output);
                self.handle_flattened_table(element, output);
            }

            "noscript" | "template" | "head" | "title" => {}

            _ => self.traverse_children(element, output),
        }
    }

    /// Render children into a separate buffer
    fn render_inline(&self, element: &Element) -> String {
        let mut buffer = String::new();
        self.traverse_children(element, &mut buffer);
        buffer
    }

    fn handle_heading(&self, element: &Element, level: usize, output: &mut String) {
        let content = normalize_text(&self.render_inline(element).replace("\\\n", " "));
        if content.is_empty() {
            return;
        }

        ensure_blank_line(output);
        output.push_str(&"#".repeat(level));
        output.push(' ');
        output.push_str(&content);
        output.push_str("\n\n");
    }

    fn handle_paragraph(&self, element: &Element, output: &mut String) {
        ensure_blank_line(output);

        let start_len = output.len();
        self.traverse_children(element, output);

        if output.len() > start_len {
            output.push_str("\n\n");
        }
    }

    fn handle_term(&self, element: &Element, output: &mut String) {
        let content = normalize_text(&self.render_inline(element));
        if content.is_empty() {
            return;
        }

        ensure_blank_line(output);
        output.push_str("**");
        output.push_str(&content);
        output.push_str("**\n\n");
    }

    fn handle_blockquote(&self, element: &Element, output: &mut String) {
        let inner = normalize_output(self.render_inline(element));
        if inner.is_empty() {
            return;
        }

        ensure_blank_line(output);
        for line in inner.lines() {
            if line.is_empty() {
                output.push_str(">\n");
            } else {
                output.push_str("> ");
                output.push_str(line);
                output.push('\n');
            }
        }
        output.push('\n');
    }

    /// `[text](href "title")`; plain text when the href is missing or unsafe
    fn handle_link(&self, element: &Element, output: &mut String) {
        let text = normalize_text(&self.render_inline(element));
        if text.is_empty() {
            return;
        }

        let href = element
            .attr("href")
            .filter(|href| !href.is_empty() && !self.policy.is_dangerous_url(href));

        let Some(href) = href else {
            output.push_str(&text);
            return;
        };

        let mut link = format!("[{text}]({href}");
        if let Some(title) = element.attr("title").filter(|title| !title.is_empty()) {
            link.push_str(" \"");
            link.push_str(&title.replace('"', "\\\""));
            link.push('"');
        }
        link.push(')');
        output.push_str(&link);
    }

    fn handle_image(&self, element: &Element, output: &mut String) {
        let Some(src) = element
            .attr("src")
            .filter(|src| !self.policy.is_dangerous_url(src))
        else {
            return;
        };
        let alt = element.attr("alt").unwrap_or_default();
        output.push_str(&format!("![{alt}]({src})"));
    }

    /// Lists nest by indenting children to the width of the parent marker
    fn handle_list(&self, list: &Element, output: &mut String, indent: &str, ordered: bool) {
        if indent.is_empty() {
            ensure_blank_line(output);
        } else if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }

        let mut number = 0;
        for child in &list.children {
            match child {
                Node::Element(item) if item.tag.eq_ignore_ascii_case("li") => {
                    number += 1;
                    let marker = if ordered {
                        format!("{number}. ")
                    } else {
                        "- ".to_string()
                    };
                    self.handle_list_item(item, output, indent, &marker);
                }
                Node::Element(nested) if is_list(nested) => {
                    let nested_indent = format!("{indent}  ");
                    self.handle_list(nested, output, &nested_indent, is_ordered(nested));
                }
                other => {
                    // Stray content directly inside a list keeps its text
                    let mut stray = String::new();
                    self.traverse(other, &mut stray);
                    let stray = normalize_text(&stray);
                    if !stray.is_empty() {
                        output.push_str(indent);
                        output.push_str(&stray);
                        output.push('\n');
                    }
                }
            }
        }

        if indent.is_empty() {
            output.push('\n');
        }
    }

    fn handle_list_item(&self, item: &Element, output: &mut String, indent: &str, marker: &str) {
        output.push_str(indent);
        output.push_str(marker);

        let continuation = format!("{indent}{}", " ".repeat(marker.len()));
        let mut content = String::new();
        let mut first_line = true;

        for child in &item.children {
            match child {
                Node::Element(nested) if is_list(nested) => {
                    flush_item_content(&mut content, output, &continuation, &mut first_line);
                    if first_line {
                        output.push('\n');
                        first_line = false;
                    }
                    self.handle_list(nested, output, &continuation, is_ordered(nested));
                }
                _ => self.traverse(child, &mut content),
            }
        }
        flush_item_content(&mut content, output, &continuation, &mut first_line);

        if !output.ends_with('\n') {
            output.push('\n');
        }
    }

    /// Fenced code block, language taken from a `language-*`/`lang-*` class
    fn handle_code_block(&self, element: &Element, output: &mut String) {
        ensure_blank_line(output);

        let language = element
            .children
            .iter()
            .filter_map(Node::as_element)
            .filter(|child| child.tag.eq_ignore_ascii_case("code"))
            .find_map(|code| code.attr("class").and_then(detect_language))
            .unwrap_or_default();

        output.push_str("```");
        output.push_str(&language);
        output.push('\n');

        // Code is copied exactly, no normalization
        for child in &element.children {
            extract_code_content(child, output);
        }

        if !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str("```\n\n");
    }

    fn handle_inline_code(&self, element: &Element, output: &mut String) {
        let mut code = String::new();
        for child in &element.children {
            extract_code_content(child, &mut code);
        }
        if code.is_empty() {
            return;
        }

        if code.contains('`') {
            output.push_str(&format!("`` {code} ``"));
        } else {
            output.push_str(&format!("`{code}`"));
        }
    }

    /// Bold/italic; surrounding whitespace moves outside the markers
    fn handle_emphasis(&self, element: &Element, delimiter: &str, output: &mut String) {
        let content = self.render_inline(element);
        let trimmed = content.trim();
        let raw = element.text_content();
        let separate = !output.is_empty() && !output.ends_with([' ', '\n']);

        if trimmed.is_empty() {
            if !raw.is_empty() && separate {
                output.push(' ');
            }
            return;
        }

        if raw.starts_with(char::is_whitespace) && separate {
            output.push(' ');
        }
        output.push_str(delimiter);
        output.push_str(trimmed);
        output.push_str(delimiter);
        if raw.ends_with(char::is_whitespace) {
            output.push(' ');
        }
    }

    /// GFM pipe table; the first row is the header
    fn handle_table(&self, table: &Element, output: &mut String) {
        let rows = table_rows(table);
        let Some((header_row, body_rows)) = rows.split_first() else {
            return;
        };

        let headers: Vec<String> = cells(header_row)
            .map(|cell| self.render_cell(cell))
            .collect();
        if headers.is_empty() {
            return;
        }
        let alignments: Vec<TableAlignment> = cells(header_row).map(extract_alignment).collect();
        let rows: Vec<Vec<String>> = body_rows
            .iter()
            .map(|row| cells(row).map(|cell| self.render_cell(cell)).collect())
            .collect();

        ensure_blank_line(output);
        write_gfm_table(output, &headers, &alignments, &rows);
        output.push('\n');
    }

    /// Tables without GFM: one line of cell text per row
    fn handle_flattened_table(&self, table: &Element, output: &mut String) {
        for row in table_rows(table) {
            let line: Vec<String> = cells(row)
                .map(|cell| normalize_text(&self.render_inline(cell)))
                .filter(|text| !text.is_empty())
                .collect();
            if !line.is_empty() {
                output.push_str(&line.join(" "));
                output.push_str("\n\n");
            }
        }
    }

    fn render_cell(&self, cell: &Element) -> String {
        normalize_text(&self.render_inline(cell).replace("\\\n", " ")).replace('|', "\\|")
    }
}

#[async_trait]
impl Converter for MarkdownConverter {
    async fn convert(&self, html: &str) -> Result<String, ConversionError> {
        Ok(self.convert_html(html))
    }
}

fn is_list(element: &Element) -> bool {
    element.tag.eq_ignore_ascii_case("ul") || element.tag.eq_ignore_ascii_case("ol")
}

fn is_ordered(element: &Element) -> bool {
    element.tag.eq_ignore_ascii_case("ol")
}

/// Write buffered list-item content, continuation lines indented
fn flush_item_content(
    content: &mut String,
    output: &mut String,
    continuation: &str,
    first_line: &mut bool,
) {
    for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if *first_line {
            *first_line = false;
        } else {
            output.push_str(continuation);
        }
        output.push_str(line);
        output.push('\n');
    }
    content.clear();
}

/// Ensure a blank line separates the next block from previous output
fn ensure_blank_line(output: &mut String) {
    if !output.is_empty() && !output.ends_with("\n\n") {
        if output.ends_with('\n') {
            output.push('\n');
        } else {
            output.push_str("\n\n");
        }
    }
}

fn detect_language(class: &str) -> Option<String> {
    class.split_whitespace().find_map(|name| {
        name.strip_prefix("language-")
            .or_else(|| name.strip_prefix("lang-"))
            .filter(|lang| !lang.is_empty())
            .map(str::to_string)
    })
}

fn extract_code_content(node: &Node, output: &mut String) {
    match node {
        Node::Text(text) => output.push_str(text),
        Node::Element(element) if element.tag.eq_ignore_ascii_case("br") => output.push('\n'),
        Node::Element(element) => {
            for child in &element.children {
                extract_code_content(child, output);
            }
        }
    }
}

/// Rows of a table in document order, through thead/tbody/tfoot
fn table_rows(table: &Element) -> Vec<&Element> {
    let mut rows = Vec::new();
    for child in table.children.iter().filter_map(Node::as_element) {
        match child.tag.to_ascii_lowercase().as_str() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children
                    .iter()
                    .filter_map(Node::as_element)
                    .filter(|row| row.tag.eq_ignore_ascii_case("tr")),
            ),
            _ => {}
        }
    }
    rows
}

fn cells<'a>(row: &'a Element) -> impl Iterator<Item = &'a Element> + 'a {
    row.children
        .iter()
        .filter_map(Node::as_element)
        .filter(|cell| cell.tag.eq_ignore_ascii_case("td") || cell.tag.eq_ignore_ascii_case("th"))
}

/// Alignment from `align` or an inline `text-align` style
fn extract_alignment(cell: &Element) -> TableAlignment {
    if let Some(align) = cell.attr("align") {
        return match align.to_ascii_lowercase().as_str() {
            "center" => TableAlignment::Center,
            "right" => TableAlignment::Right,
            _ => TableAlignment::Left,
        };
    }

    if let Some(style) = cell.attr("style") {
        let style = style.to_ascii_lowercase();
        if style.contains("text-align") {
            if style.contains("center") {
                return TableAlignment::Center;
            } else if style.contains("right") {
                return TableAlignment::Right;
            }
        }
    }

    TableAlignment::Left
}

fn write_gfm_table(
    output: &mut String,
    headers: &[String],
    alignments: &[TableAlignment],
    rows: &[Vec<String>],
) {
    output.push('|');
    for header in headers {
        output.push(' ');
        output.push_str(header);
        output.push_str(" |");
    }
    output.push('\n');

    output.push('|');
    for index in 0..headers.len() {
        output.push(' ');
        match alignments.get(index).copied().unwrap_or(TableAlignment::Left) {
            TableAlignment::Left => output.push_str("---"),
            TableAlignment::Center => output.push_str(":---:"),
            TableAlignment::Right => output.push_str("---:"),
        }
        output.push_str(" |");
    }
    output.push('\n');

    // Rows are cut or padded to the header width
    for row in rows {
        output.push('|');
        for index in 0..headers.len() {
            output.push(' ');
            if let Some(cell) = row.get(index) {
                output.push_str(cell);
            }
            output.push_str(" |");
        }
        output.push('\n');
    }
}

/// Collapse whitespace runs to single spaces and trim
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize final output for deterministic Markdown
fn normalize_output(output: String) -> String {
    let output = output.replace("\r\n", "\n");

    let mut result = String::with_capacity(output.len());
    let mut prev_blank = true;
    let mut in_code_block = false;

    for line in output.lines() {
        let fence = line.trim_start().starts_with("```");
        let trimmed = line.trim_end();

        if trimmed.is_empty() && !in_code_block {
            if !prev_blank {
                result.push('\n');
                prev_blank = true;
            }
        } else {
            if in_code_block || fence {
                result.push_str(trimmed);
            } else {
                result.push_str(&normalize_line_whitespace(trimmed));
            }
            result.push('\n');
            prev_blank = false;
        }

        if fence {
            in_code_block = !in_code_block;
        }
    }

    while result.ends_with("\n\n") {
        result.pop();
    }
    if result.trim().is_empty() {
        result.clear();
    }
    result
}

/// Collapse consecutive spaces, keeping indentation and inline code
fn normalize_line_whitespace(line: &str) -> String {
    let mut result = String::with_capacity(line.len());
    let mut prev_space = false;
    let mut at_start = true;
    let mut in_inline_code = false;

    for ch in line.chars() {
        if ch == '`' {
            in_inline_code = !in_inline_code;
            result.push(ch);
            prev_space = false;
            at_start = false;
        } else if ch == ' ' {
            if in_inline_code || at_start || !prev_space {
                result.push(ch);
            }
            prev_space = !in_inline_code && !at_start;
        } else {
            result.push(ch);
            prev_space = false;
            at_start = false;
        }
    }

    result
}
