// File: src/errors.rs
//
// Error handling and reporting for the Lox compiler and VM.
// Provides structured error types with source location information
// and pretty-printed error messages.

use colored::Colorize;
use std::fmt;

/// Source location information for tracking where code appears in a file
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocation {
    pub line: usize,
    pub file: Option<String>,
}

#[allow(dead_code)]
impl SourceLocation {
    pub fn new(line: usize) -> Self {
        Self { line, file: None }
    }

    pub fn with_file(line: usize, file: String) -> Self {
        Self { line, file: Some(file) }
    }

    pub fn unknown() -> Self {
        Self { line: 0, file: None }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:{}", file, self.line)
        } else {
            write!(f, "line {}", self.line)
        }
    }
}

/// The three disjoint kinds of error the system can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lexer/parser syntax error.
    Parse,
    /// Compiler semantic error (name resolution, scoping, etc).
    Semantic,
    /// VM runtime error.
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Parse => write!(f, "Syntax Error"),
            ErrorKind::Semantic => write!(f, "Compile Error"),
            ErrorKind::Runtime => write!(f, "Runtime Error"),
        }
    }
}

/// A structured error with location information.
#[derive(Debug, Clone)]
pub struct LoxError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: SourceLocation,
    pub source_line: Option<String>,
    pub suggestion: Option<String>,
    /// Innermost-to-outermost frame names, set for runtime errors only.
    pub call_stack: Vec<String>,
}

#[allow(dead_code)]
impl LoxError {
    pub fn new(kind: ErrorKind, message: String, location: SourceLocation) -> Self {
        Self {
            kind,
            message,
            location,
            source_line: None,
            suggestion: None,
            call_stack: Vec::new(),
        }
    }

    pub fn with_source(mut self, source_line: String) -> Self {
        self.source_line = Some(source_line);
        self
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn with_call_stack(mut self, call_stack: Vec<String>) -> Self {
        self.call_stack = call_stack;
        self
    }

    pub fn parse_error(message: String, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Parse, message, location)
    }

    pub fn semantic_error(message: String, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Semantic, message, location)
    }

    pub fn runtime_error(message: String, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Runtime, message, location)
    }
}

impl fmt::Display for LoxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind_str = format!("{}", self.kind);
        writeln!(f, "{}: {}", kind_str.red().bold(), self.message.bold())?;
        writeln!(f, "{}", format!("  --> {}", self.location).bright_blue())?;

        if let Some(ref source) = self.source_line {
            writeln!(f, "   {}", "|".bright_blue())?;
            writeln!(
                f,
                "{} {} {}",
                format!("{:3}", self.location.line).bright_blue(),
                "|".bright_blue(),
                source
            )?;
            writeln!(f, "   {}", "|".bright_blue())?;
        }

        if let Some(ref suggestion) = self.suggestion {
            writeln!(
                f,
                "   {} {}",
                "=".bright_green(),
                format!("did you mean '{}'?", suggestion).bright_green()
            )?;
        }

        for (depth, frame) in self.call_stack.iter().enumerate() {
            writeln!(f, "   {} at {}", " ".repeat(depth), frame)?;
        }

        Ok(())
    }
}

impl std::error::Error for LoxError {}

/// Computes the Levenshtein distance between two strings.
/// Used for "did you mean?" suggestions on undefined-name errors.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let len1 = s1.chars().count();
    let len2 = s2.chars().count();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0; len2 + 1]; len1 + 1];

    for (i, row) in matrix.iter_mut().enumerate().take(len1 + 1) {
        row[0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] { 0 } else { 1 };
            matrix[i][j] = std::cmp::min(
                std::cmp::min(matrix[i - 1][j] + 1, matrix[i][j - 1] + 1),
                matrix[i - 1][j - 1] + cost,
            );
        }
    }

    matrix[len1][len2]
}

/// Find the closest match from a list of candidates using Levenshtein distance.
/// Returns None if no good match is found (distance > 3).
pub fn find_closest_match<'a>(target: &str, candidates: &'a [String]) -> Option<&'a str> {
    let mut best_match = None;
    let mut best_distance = usize::MAX;

    for candidate in candidates {
        let distance = levenshtein_distance(target, candidate);
        if distance <= 3 && distance < best_distance {
            best_distance = distance;
            best_match = Some(candidate.as_str());
        }
    }

    best_match
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_identical_strings_is_zero() {
        assert_eq!(levenshtein_distance("hello", "hello"), 0);
    }

    #[test]
    fn levenshtein_finds_close_match() {
        let candidates = vec!["counter".to_string(), "greeting".to_string()];
        assert_eq!(find_closest_match("countr", &candidates), Some("counter"));
    }

    #[test]
    fn levenshtein_rejects_far_match() {
        let candidates = vec!["zzz".to_string()];
        assert_eq!(find_closest_match("abcdefg", &candidates), None);
    }
}
