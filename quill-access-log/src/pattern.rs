//! Compiles `%`-directive format strings into typed element sequences.
//!
//! Compilation never fails. Unknown directives become visible
//! `???x???` placeholders so a bad pattern shows up in its own output.

/// Alias for the Common Log Format.
pub const COMMON_ALIAS: &str = "common";
pub const COMMON_PATTERN: &str = "%h %l %u %t \"%r\" %s %b";

/// Alias for the Combined Log Format.
pub const COMBINED_ALIAS: &str = "combined";
pub const COMBINED_PATTERN: &str = "%h %l %u %t \"%r\" %s %b \"%{Referer}i\" \"%{User-Agent}i\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Millis,
    Seconds,
}

/// One compiled literal run or directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogElement {
    Literal(String),
    RemoteAddr,
    LocalAddr,
    LocalPort,
    Protocol,
    Method,
    QueryString,
    RequestLine,
    RequestUri,
    HostName,
    ServerName,
    Status,
    SessionId,
    User,
    ElapsedTime(TimeUnit),
    ByteCount { zero_as_dash: bool },
    DateTime,
    ThreadName,
    Header(String),
    Cookie(String),
    RequestAttribute(String),
    SessionAttribute(String),
    ResponseHeader(String),
    /// `Some(c)` renders `???c???`; `None` (bad parameterized conversion) renders `???`.
    UnknownDirective(Option<char>),
}

impl LogElement {
    /// Element for a plain single-character directive.
    pub fn for_directive(ch: char) -> Self {
        match ch {
            'a' => LogElement::RemoteAddr,
            'A' => LogElement::LocalAddr,
            'b' => LogElement::ByteCount { zero_as_dash: true },
            'B' => LogElement::ByteCount { zero_as_dash: false },
            'D' => LogElement::ElapsedTime(TimeUnit::Millis),
            'h' => LogElement::HostName,
            'H' => LogElement::Protocol,
            'l' => LogElement::Literal("-".to_string()),
            'm' => LogElement::Method,
            'p' => LogElement::LocalPort,
            'q' => LogElement::QueryString,
            'r' => LogElement::RequestLine,
            's' => LogElement::Status,
            'S' => LogElement::SessionId,
            't' => LogElement::DateTime,
            'T' => LogElement::ElapsedTime(TimeUnit::Seconds),
            'u' => LogElement::User,
            'U' => LogElement::RequestUri,
            'v' => LogElement::ServerName,
            'I' => LogElement::ThreadName,
            other => LogElement::UnknownDirective(Some(other)),
        }
    }

    /// Element for a `%{name}c` directive.
    pub fn for_parameterized(name: String, conversion: char) -> Self {
        match conversion {
            'i' => LogElement::Header(name),
            'c' => LogElement::Cookie(name),
            'o' => LogElement::ResponseHeader(name),
            'r' => LogElement::RequestAttribute(name),
            's' => LogElement::SessionAttribute(name),
            _ => LogElement::UnknownDirective(None),
        }
    }
}

/// An immutable, shareable sequence of elements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledPattern {
    source: String,
    elements: Vec<LogElement>,
}

impl CompiledPattern {
    /// Compile a format string as-is (aliases are not expanded).
    pub fn compile(pattern: &str) -> Self {
        Self {
            source: pattern.to_string(),
            elements: compile_elements(pattern),
        }
    }

    /// Compile a configured pattern, expanding `common` / `combined`.
    pub fn from_config(pattern: &str) -> Self {
        Self::compile(expand_alias(pattern))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn elements(&self) -> &[LogElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Expand the `common` / `combined` aliases; anything else passes through.
pub fn expand_alias(pattern: &str) -> &str {
    match pattern {
        COMMON_ALIAS => COMMON_PATTERN,
        COMBINED_ALIAS => COMBINED_PATTERN,
        other => other,
    }
}

fn compile_elements(pattern: &str) -> Vec<LogElement> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut elements = Vec::new();
    let mut literal = String::new();
    let mut directive = false;

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if directive {
            if ch == '{' {
                // Scan for the closing brace; a conversion char must follow it.
                let mut j = i + 1;
                while j < chars.len() && chars[j] != '}' {
                    j += 1;
                }
                if j + 1 < chars.len() {
                    let name: String = chars[i + 1..j].iter().collect();
                    elements.push(LogElement::for_parameterized(name, chars[j + 1]));
                    i = j + 1;
                } else {
                    // Unterminated, or nothing after `}`: `{` is an ordinary directive.
                    elements.push(LogElement::for_directive(ch));
                }
            } else {
                elements.push(LogElement::for_directive(ch));
            }
            directive = false;
        } else if ch == '%' {
            directive = true;
            if !literal.is_empty() {
                elements.push(LogElement::Literal(std::mem::take(&mut literal)));
            }
        } else {
            literal.push(ch);
        }
        i += 1;
    }

    if !literal.is_empty() {
        elements.push(LogElement::Literal(literal));
    }

    elements
}
