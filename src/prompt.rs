use std::collections::VecDeque;
use std::io::{self, BufRead, Stdin, StdinLock, Stdout, Write};
use std::path::Path;

use crate::collect::Candidate;
use crate::date::{parse_date, Stamp};
use crate::metadata::TagMap;

/// One distinct value offered to the user, with the candidates that agree on it.
#[derive(Debug, Clone)]
pub struct Choice<'a> {
    pub value: Stamp,
    pub candidates: Vec<&'a Candidate>,
}

/// What the reconciler needs decided.
#[derive(Debug)]
pub struct PromptRequest<'a> {
    pub path: &'a Path,
    pub choices: Vec<Choice<'a>>,
    /// Full metadata dump to show first, when requested.
    pub raw_tags: Option<&'a TagMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Select(usize),
    Custom(Stamp),
    Skip,
    Quit,
}

/// Synchronous port for interactive disambiguation.
pub trait Prompter {
    fn choose(&mut self, request: &PromptRequest<'_>) -> io::Result<Reply>;
}

/// Line-oriented prompt on a reader/writer pair (the terminal in production).
pub struct TerminalPrompter<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompter<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        let stdin: Stdin = io::stdin();
        Self::new(stdin.lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn render(&mut self, request: &PromptRequest<'_>) -> io::Result<()> {
        writeln!(self.output, "\nFile: {}", request.path.display())?;
        if let Some(raw) = request.raw_tags {
            writeln!(self.output, "METADATA DUMP:")?;
            let dump = serde_json::to_string_pretty(raw).map_err(io::Error::other)?;
            writeln!(self.output, "{dump}")?;
        }
        writeln!(self.output, "Multiple possible dates found:")?;
        for (i, choice) in request.choices.iter().enumerate() {
            writeln!(self.output, "{i}: {}", choice.value)?;
            for candidate in &choice.candidates {
                writeln!(self.output, "     <- {}: {}", candidate.origin, candidate.tag)?;
            }
        }
        writeln!(self.output, "c: custom date, s: skip, q: quit, n: next, p: prev")
    }
}

impl<R: BufRead, W: Write> Prompter for TerminalPrompter<R, W> {
    fn choose(&mut self, request: &PromptRequest<'_>) -> io::Result<Reply> {
        self.render(request)?;
        let count = request.choices.len();
        let mut current = 0;

        loop {
            write!(self.output, "Choose index (default {current}): ")?;
            self.output.flush()?;
            let Some(answer) = self.read_line()? else {
                return Ok(Reply::Quit);
            };

            match answer.to_lowercase().as_str() {
                "" if count > 0 => return Ok(Reply::Select(current)),
                "q" => return Ok(Reply::Quit),
                "s" => return Ok(Reply::Skip),
                "c" => {
                    write!(self.output, "Enter custom datetime (YYYY-MM-DD HH:MM:SS): ")?;
                    self.output.flush()?;
                    let Some(custom) = self.read_line()? else {
                        return Ok(Reply::Quit);
                    };
                    match parse_date(&custom) {
                        Some(value) => return Ok(Reply::Custom(value)),
                        None => writeln!(self.output, "Invalid format: {custom}")?,
                    }
                }
                "n" | "p" if count > 0 => {
                    current = if answer.eq_ignore_ascii_case("n") {
                        (current + 1) % count
                    } else {
                        (current + count - 1) % count
                    };
                    writeln!(self.output, "Selected {current}: {}", request.choices[current].value)?;
                }
                other => match other.parse::<usize>() {
                    Ok(index) if index < count => return Ok(Reply::Select(index)),
                    _ => writeln!(self.output, "Invalid choice")?,
                },
            }
        }
    }
}

/// Replays fixed replies; answers `Quit` once they run out.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    replies: VecDeque<Reply>,
    /// Number of choices offered on each call.
    pub offered: Vec<usize>,
}

impl ScriptedPrompter {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            offered: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn choose(&mut self, request: &PromptRequest<'_>) -> io::Result<Reply> {
        self.offered.push(request.choices.len());
        Ok(self.replies.pop_front().unwrap_or(Reply::Quit))
    }
}
