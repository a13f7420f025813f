#![forbid(unsafe_code)]

//! Markdown ledgers: `tasks.md` (tasks and the criteria they satisfy) and `spec.md`
//! (user stories and acceptance-criteria checkboxes).

use super::error::StoreError;
use crate::fsio;
use crate::layout::{ProjectLayout, SPEC_FILE, TASKS_FILE};
use std::collections::BTreeSet;
use sw_core::completion::{
    AcceptanceCriterion, CompletionReport, TaskRecord, UserStory, propagate,
};
use sw_core::ids::IncrementId;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskLedger {
    pub tasks: Vec<TaskRecord>,
    pub skipped_lines: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpecLedger {
    pub criteria: Vec<AcceptanceCriterion>,
    pub stories: Vec<UserStory>,
    pub skipped_lines: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerScan {
    pub report: CompletionReport,
    pub tasks: TaskLedger,
    pub spec: SpecLedger,
}

impl LedgerScan {
    pub fn skipped_lines(&self) -> usize {
        self.tasks.skipped_lines + self.spec.skipped_lines
    }
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    Some((level, rest.trim()))
}

/// Leading `PREFIX-<id>` token of a heading title, up to `:` or whitespace.
fn heading_token<'a>(title: &'a str, prefix: &str) -> Option<&'a str> {
    if !title.starts_with(prefix) {
        return None;
    }
    title.split([':', ' ', '\t']).next()
}

fn parse_task_id(token: &str) -> Option<String> {
    let digits = token.strip_prefix("T-")?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(token.to_string())
}

/// `US-1`, `US-001` -> `US-001`.
fn normalize_story_id(token: &str) -> Option<String> {
    let digits = token.strip_prefix("US-")?;
    let n = digits.parse::<u32>().ok()?;
    Some(format!("US-{n:03}"))
}

/// Criterion id plus the story it implies (`AC-US1-01` -> `US-001`).
fn parse_criterion_id(raw: &str) -> Option<(String, Option<String>)> {
    let token = raw
        .trim()
        .trim_matches('*')
        .trim_end_matches(['.', ',', ';', ':']);
    let rest = token.strip_prefix("AC-")?;
    let segments: Vec<&str> = rest.split('-').collect();
    if segments.len() < 2
        || segments
            .iter()
            .any(|s| s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()))
    {
        return None;
    }
    let last = segments[segments.len() - 1];
    if !last.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let story = segments[0]
        .strip_prefix("US")
        .and_then(|n| n.parse::<u32>().ok())
        .map(|n| format!("US-{n:03}"));
    Some((token.to_string(), story))
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

#[derive(Default)]
struct TaskBlock {
    id: String,
    criteria: Vec<String>,
    checked: usize,
    unchecked: usize,
}

impl TaskBlock {
    fn flush(self, out: &mut Vec<TaskRecord>) {
        let completed = self.checked > 0 && self.unchecked == 0;
        if self.criteria.is_empty() {
            out.push(TaskRecord {
                id: self.id,
                parent_criterion_id: None,
                completed,
            });
            return;
        }
        for criterion in self.criteria {
            out.push(TaskRecord {
                id: self.id.clone(),
                parent_criterion_id: Some(criterion),
                completed,
            });
        }
    }
}

fn criteria_field(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let trimmed = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .unwrap_or(trimmed);
    ["**AC**:", "**Satisfies ACs**:", "AC:"]
        .iter()
        .find_map(|key| trimmed.strip_prefix(key))
}

/// Parses `tasks.md`. A task is complete iff its block has at least one `[x]` and no `[ ]`.
pub fn parse_tasks(text: &str) -> TaskLedger {
    let mut ledger = TaskLedger::default();
    let mut current: Option<TaskBlock> = None;
    let mut in_fence = false;

    for (idx, line) in text.lines().enumerate() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        if let Some((_, title)) = heading_level(line) {
            if let Some(block) = current.take() {
                block.flush(&mut ledger.tasks);
            }
            if let Some(token) = heading_token(title, "T-") {
                match parse_task_id(token) {
                    Some(id) => {
                        current = Some(TaskBlock {
                            id,
                            ..TaskBlock::default()
                        })
                    }
                    None => {
                        tracing::warn!(line = idx + 1, token, "skipping task with malformed id");
                        ledger.skipped_lines += 1;
                    }
                }
            }
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };
        if let Some(list) = criteria_field(line) {
            for raw in list.split([',', ' ', '\t']).filter(|s| !s.trim().is_empty()) {
                match parse_criterion_id(raw) {
                    Some((id, _)) => {
                        if !block.criteria.contains(&id) {
                            block.criteria.push(id);
                        }
                    }
                    None => {
                        tracing::warn!(line = idx + 1, token = raw, "skipping malformed criterion reference");
                        ledger.skipped_lines += 1;
                    }
                }
            }
            continue;
        }
        let lower = line.to_ascii_lowercase();
        if lower.contains("[x]") {
            block.checked += 1;
        } else if lower.contains("[ ]") {
            block.unchecked += 1;
        }
    }
    if let Some(block) = current.take() {
        block.flush(&mut ledger.tasks);
    }
    ledger
}

struct CheckboxLine<'a> {
    checked: bool,
    /// Byte offset of the mark inside the line.
    mark_offset: usize,
    rest: &'a str,
}

fn checkbox_line(line: &str) -> Option<CheckboxLine<'_>> {
    let indent = line.len() - line.trim_start().len();
    let trimmed = &line[indent..];
    let body = trimmed
        .strip_prefix("- [")
        .or_else(|| trimmed.strip_prefix("* ["))?;
    let mut chars = body.chars();
    let mark = chars.next()?;
    if chars.next()? != ']' {
        return None;
    }
    let checked = match mark {
        'x' | 'X' => true,
        ' ' => false,
        _ => return None,
    };
    Some(CheckboxLine {
        checked,
        mark_offset: indent + 3,
        rest: body[2..].trim(),
    })
}

fn checkbox_criterion(rest: &str) -> Option<&str> {
    let token = rest.trim_start_matches('*');
    if !token.starts_with("AC-") {
        return None;
    }
    Some(token.split([':', ' ']).next().unwrap_or(token))
}

/// Parses `spec.md`: `US-NNN` headings and `- [x] AC-...:` checkbox lines.
pub fn parse_spec(text: &str) -> SpecLedger {
    let mut ledger = SpecLedger::default();
    let mut story: Option<(usize, String)> = None;
    let mut seen = BTreeSet::new();
    let mut in_fence = false;

    for (idx, line) in text.lines().enumerate() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        if let Some((level, title)) = heading_level(line) {
            if let Some(id) = heading_token(title, "US-").and_then(normalize_story_id) {
                if !ledger.stories.iter().any(|s| s.id == id) {
                    ledger.stories.push(UserStory { id: id.clone() });
                }
                story = Some((level, id));
            } else if story.as_ref().is_some_and(|(story_level, _)| level <= *story_level) {
                story = None;
            }
            continue;
        }

        let Some(checkbox) = checkbox_line(line) else {
            continue;
        };
        let Some(raw) = checkbox_criterion(checkbox.rest) else {
            continue;
        };
        let Some((id, implied_story)) = parse_criterion_id(raw) else {
            tracing::warn!(line = idx + 1, token = raw, "skipping malformed acceptance criterion");
            ledger.skipped_lines += 1;
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        ledger.criteria.push(AcceptanceCriterion {
            id,
            parent_story_id: implied_story.or_else(|| story.as_ref().map(|(_, id)| id.clone())),
            manual_checked: checkbox.checked,
        });
    }
    ledger
}

/// Reads both ledgers of an increment and propagates completion. Missing files read as empty.
pub fn scan_completion(layout: &ProjectLayout, id: &IncrementId) -> Result<LedgerScan, StoreError> {
    let Some((_, dir)) = layout.locate(id) else {
        return Err(StoreError::NotFound(id.to_string()));
    };
    let tasks = parse_tasks(&fsio::read_optional(&dir.join(TASKS_FILE))?.unwrap_or_default());
    let spec = parse_spec(&fsio::read_optional(&dir.join(SPEC_FILE))?.unwrap_or_default());
    let report = propagate(&tasks.tasks, &spec.criteria, &spec.stories);
    Ok(LedgerScan {
        report,
        tasks,
        spec,
    })
}

/// Flips spec.md checkboxes whose state disagrees with their tasks. Returns the changed ids.
pub fn sync_criteria_checkboxes(
    layout: &ProjectLayout,
    id: &IncrementId,
) -> Result<Vec<String>, StoreError> {
    let scan = scan_completion(layout, id)?;
    let targets: Vec<(&str, bool)> = scan
        .report
        .criteria
        .iter()
        .filter(|c| c.checkbox_out_of_date())
        .map(|c| (c.id.as_str(), c.complete))
        .collect();
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let Some((_, dir)) = layout.locate(id) else {
        return Err(StoreError::NotFound(id.to_string()));
    };
    let path = dir.join(SPEC_FILE);
    let Some(text) = fsio::read_optional(&path)? else {
        return Ok(Vec::new());
    };

    let mut out = String::with_capacity(text.len());
    let mut changed = Vec::new();
    let mut in_fence = false;
    for line in text.split_inclusive('\n') {
        if is_fence(line) {
            in_fence = !in_fence;
        }
        let target = (!in_fence)
            .then(|| checkbox_line(line))
            .flatten()
            .and_then(|cb| {
                let raw = checkbox_criterion(cb.rest)?;
                let (criterion, _) = parse_criterion_id(raw)?;
                let (_, complete) = targets.iter().find(|(t, _)| *t == criterion)?;
                (cb.checked != *complete).then_some((cb.mark_offset, *complete, criterion))
            });
        match target {
            Some((offset, complete, criterion)) => {
                out.push_str(&line[..offset]);
                out.push(if complete { 'x' } else { ' ' });
                out.push_str(&line[offset + 1..]);
                if !changed.contains(&criterion) {
                    changed.push(criterion);
                }
            }
            None => out.push_str(line),
        }
    }
    if !changed.is_empty() {
        fsio::write_atomic(&path, out.as_bytes())?;
        tracing::info!(increment = %id, count = changed.len(), "acceptance criteria checkboxes synced from tasks");
    }
    Ok(changed)
}
