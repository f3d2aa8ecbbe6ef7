use std::io;

use serde::{Deserialize, Serialize};

use crate::collect::{Candidate, CandidateSet};
use crate::date::Stamp;
use crate::prompt::{Choice, PromptRequest, Prompter, Reply};

/// Outcome of resolving one file's candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// Candidates agreed, or the tie-break picked a value without asking.
    Auto { value: Stamp },
    UserSelected { value: Stamp, index: usize },
    /// A datetime the user typed in.
    Custom { value: Stamp },
    Skipped,
}

impl Decision {
    pub fn value(&self) -> Option<Stamp> {
        match self {
            Decision::Auto { value }
            | Decision::UserSelected { value, .. }
            | Decision::Custom { value } => Some(*value),
            Decision::Skipped => None,
        }
    }
}

/// Non-interactive policy for disagreeing candidates.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The group holding the first collected candidate.
    #[default]
    First,
    Earliest,
    Latest,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResolveOptions {
    pub interactive: bool,
    pub show_raw_dump: bool,
    #[serde(default)]
    pub tie_break: TieBreak,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No candidate dates found")]
    NoCandidateData,
    #[error("Stopped at the user's request")]
    Quit,
    #[error("Prompt failed: {0}")]
    Prompt(#[from] io::Error),
}

/// Candidates sharing one value, in first-seen order.
#[derive(Debug, Clone)]
pub struct ValueGroup<'a> {
    pub value: Stamp,
    pub members: Vec<&'a Candidate>,
}

/// Cluster candidates by compatible value. Each candidate joins the first
/// group it is compatible with, whose value then becomes the more precise of the two.
pub fn group(candidates: &[Candidate]) -> Vec<ValueGroup<'_>> {
    let mut groups: Vec<ValueGroup<'_>> = Vec::new();
    for candidate in candidates {
        match groups
            .iter_mut()
            .find(|g| g.value.is_compatible(&candidate.value))
        {
            Some(group) => {
                group.value = group.value.more_precise(candidate.value);
                group.members.push(candidate);
            }
            None => groups.push(ValueGroup {
                value: candidate.value,
                members: vec![candidate],
            }),
        }
    }
    groups
}

fn tie_break(groups: &[ValueGroup<'_>], policy: TieBreak) -> Stamp {
    let mut best = &groups[0];
    for group in &groups[1..] {
        let better = match policy {
            TieBreak::First => false,
            TieBreak::Earliest => group.value.local() < best.value.local(),
            TieBreak::Latest => group.value.local() > best.value.local(),
        };
        if better {
            best = group;
        }
    }
    best.value
}

/// Resolve a candidate set to a single decision and record the value on the set.
///
/// A single value group never prompts. With several groups the prompter is
/// asked when `interactive` is set, otherwise the tie-break policy decides.
pub fn resolve(
    set: &mut CandidateSet,
    options: &ResolveOptions,
    prompter: &mut dyn Prompter,
) -> Result<Decision, ResolveError> {
    if set.is_empty() {
        return Err(ResolveError::NoCandidateData);
    }

    let decision = {
        let groups = group(&set.candidates);
        log::debug!(
            "{}: {} candidate(s) in {} group(s)",
            set.path.display(),
            set.candidates.len(),
            groups.len()
        );

        if groups.len() == 1 {
            Decision::Auto {
                value: groups[0].value,
            }
        } else if !options.interactive {
            Decision::Auto {
                value: tie_break(&groups, options.tie_break),
            }
        } else {
            let request = PromptRequest {
                path: &set.path,
                choices: groups
                    .iter()
                    .map(|g| Choice {
                        value: g.value,
                        candidates: g.members.clone(),
                    })
                    .collect(),
                raw_tags: if options.show_raw_dump {
                    set.raw_tags.as_ref()
                } else {
                    None
                },
            };
            ask(prompter, &request)?
        }
    };

    set.resolved = decision.value();
    Ok(decision)
}

fn ask(prompter: &mut dyn Prompter, request: &PromptRequest<'_>) -> Result<Decision, ResolveError> {
    loop {
        match prompter.choose(request)? {
            Reply::Select(index) => match request.choices.get(index) {
                Some(choice) => {
                    return Ok(Decision::UserSelected {
                        value: choice.value,
                        index,
                    })
                }
                None => log::warn!(
                    "Selection {index} is out of range 0..{}",
                    request.choices.len()
                ),
            },
            Reply::Custom(value) => return Ok(Decision::Custom { value }),
            Reply::Skip => return Ok(Decision::Skipped),
            Reply::Quit => return Err(ResolveError::Quit),
        }
    }
}
