//! Line-oriented picker for the login scope selection.

use larkkey_core::user::selector::Picker;
use std::io::{self, BufRead, BufReader, Write};

/// Numbered-list prompts read one line at a time.
///
/// - single choice: a number, empty for the default, `q` to cancel
/// - multiple choice: numbers separated by spaces or commas, `all`,
///   `none`, empty to keep the marked items, `q` to cancel
pub struct LinePicker<R, W> {
    input: R,
    output: W,
}

impl LinePicker<BufReader<io::Stdin>, io::Stderr> {
    /// Prompts on stderr, answers from stdin.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stderr())
    }
}

impl<R: BufRead, W: Write> LinePicker<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// `None` on end of input or a read error.
    fn read_answer(&mut self) -> Option<String> {
        let _ = self.output.flush();
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    fn list(&mut self, prompt: &str, options: &[String], marked: impl Fn(usize) -> bool) {
        let _ = writeln!(self.output, "{}", prompt);
        for (i, option) in options.iter().enumerate() {
            let mark = if marked(i) { "*" } else { " " };
            let _ = writeln!(self.output, " {} {:>2}) {}", mark, i + 1, option);
        }
    }
}

fn parse_index(value: &str, len: usize) -> Option<usize> {
    value
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=len).contains(n))
        .map(|n| n - 1)
}

impl<R: BufRead + Send, W: Write + Send> Picker for LinePicker<R, W> {
    fn select_one(&mut self, prompt: &str, options: &[String], default: usize) -> Option<usize> {
        self.list(prompt, options, |i| i == default);
        loop {
            let _ = write!(self.output, "Choice [{}, q to cancel]: ", default + 1);
            let answer = self.read_answer()?;
            match answer.as_str() {
                "" => return Some(default),
                "q" | "quit" => return None,
                other => match parse_index(other, options.len()) {
                    Some(index) => return Some(index),
                    None => {
                        let _ = writeln!(self.output, "Enter a number from 1 to {}", options.len());
                    }
                },
            }
        }
    }

    fn select_many(
        &mut self,
        prompt: &str,
        options: &[String],
        preselected: &[bool],
    ) -> Option<Vec<usize>> {
        let marked = |i: usize| preselected.get(i).copied().unwrap_or(false);
        self.list(prompt, options, marked);
        loop {
            let _ = write!(
                self.output,
                "Numbers (space or comma separated), all, none; empty keeps *; q cancels: "
            );
            let answer = self.read_answer()?;
            match answer.as_str() {
                "" => return Some((0..options.len()).filter(|i| marked(*i)).collect()),
                "q" | "quit" => return None,
                "all" => return Some((0..options.len()).collect()),
                "none" => return Some(Vec::new()),
                other => {
                    let picked: Option<Vec<usize>> = other
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|s| !s.is_empty())
                        .map(|s| parse_index(s, options.len()))
                        .collect();
                    match picked {
                        Some(mut indices) => {
                            indices.sort_unstable();
                            indices.dedup();
                            return Some(indices);
                        }
                        None => {
                            let _ = writeln!(
                                self.output,
                                "Enter numbers from 1 to {}",
                                options.len()
                            );
                        }
                    }
                }
            }
        }
    }
}
