#![forbid(unsafe_code)]

//! Bottom-up completion: tasks -> acceptance criteria -> user stories -> increment.
//!
//! Completion is AND-aggregated at every level. Percentages are reported per level
//! (`task_percent` counts distinct tasks, `criteria_percent` counts criteria,
//! `story_percent` counts stories) and never mix granularities.

use std::collections::{BTreeMap, BTreeSet};


/// One task ledger entry. A task that satisfies several criteria appears once per criterion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: String,
    pub parent_criterion_id: Option<String>,
    pub completed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptanceCriterion {
    pub id: String,
    pub parent_story_id: Option<String>,
    pub manual_checked: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserStory {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CriterionCompletion {
    pub id: String,
    pub story_id: Option<String>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    /// True when the verdict came from tasks; false when it fell back to the manual checkbox.
    pub derived_from_tasks: bool,
    pub manual_checked: bool,
    pub complete: bool,
}

impl CriterionCompletion {
    /// Checkbox state disagrees with what the tasks say.
    pub fn checkbox_out_of_date(&self) -> bool {
        self.derived_from_tasks && self.manual_checked != self.complete
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoryCompletion {
    pub id: String,
    pub total_criteria: usize,
    pub completed_criteria: usize,
    pub complete: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionReport {
    pub criteria: Vec<CriterionCompletion>,
    pub stories: Vec<StoryCompletion>,
    pub orphan_criteria: Vec<String>,
    /// Criterion ids referenced by tasks but never declared.
    pub unknown_criteria: Vec<String>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub increment_complete: bool,
    pub task_percent: u8,
    pub criteria_percent: u8,
    pub story_percent: u8,
}

impl CompletionReport {
    pub fn criterion(&self, id: &str) -> Option<&CriterionCompletion> {
        self.criteria.iter().find(|c| c.id == id)
    }

    pub fn story(&self, id: &str) -> Option<&StoryCompletion> {
        self.stories.iter().find(|s| s.id == id)
    }

    pub fn completed_criteria(&self) -> usize {
        self.criteria.iter().filter(|c| c.complete).count()
    }
}

/// round(100 * completed / total), 0 for an empty set.
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u128;
    let total = total as u128;
    ((200 * completed + total) / (2 * total)) as u8
}

pub fn propagate(
    tasks: &[TaskRecord],
    criteria: &[AcceptanceCriterion],
    stories: &[UserStory],
) -> CompletionReport {
    let declared: BTreeSet<&str> = criteria.iter().map(|c| c.id.as_str()).collect();

    let mut tasks_by_criterion: BTreeMap<&str, Vec<&TaskRecord>> = BTreeMap::new();
    let mut unknown_criteria = BTreeSet::new();
    for task in tasks {
        let Some(parent) = task.parent_criterion_id.as_deref() else {
            continue;
        };
        if declared.contains(parent) {
            tasks_by_criterion.entry(parent).or_default().push(task);
        } else {
            unknown_criteria.insert(parent.to_string());
        }
    }

    let mut criteria_out = Vec::with_capacity(criteria.len());
    let mut seen_criteria = BTreeSet::new();
    for criterion in criteria {
        if !seen_criteria.insert(criterion.id.as_str()) {
            continue;
        }
        let linked = tasks_by_criterion
            .get(criterion.id.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let completed_tasks = linked.iter().filter(|t| t.completed).count();
        let derived_from_tasks = !linked.is_empty();
        let complete = if derived_from_tasks {
            completed_tasks == linked.len()
        } else {
            criterion.manual_checked
        };
        criteria_out.push(CriterionCompletion {
            id: criterion.id.clone(),
            story_id: criterion.parent_story_id.clone(),
            total_tasks: linked.len(),
            completed_tasks,
            derived_from_tasks,
            manual_checked: criterion.manual_checked,
            complete,
        });
    }

    // Stories referenced only through a criterion's parent id still count.
    let mut story_ids: Vec<String> = Vec::new();
    for story in stories {
        if !story_ids.contains(&story.id) {
            story_ids.push(story.id.clone());
        }
    }
    for criterion in &criteria_out {
        if let Some(story_id) = &criterion.story_id
            && !story_ids.contains(story_id)
        {
            story_ids.push(story_id.clone());
        }
    }

    let stories_out: Vec<StoryCompletion> = story_ids
        .into_iter()
        .map(|id| {
            let members: Vec<&CriterionCompletion> = criteria_out
                .iter()
                .filter(|c| c.story_id.as_deref() == Some(id.as_str()))
                .collect();
            let completed_criteria = members.iter().filter(|c| c.complete).count();
            StoryCompletion {
                complete: !members.is_empty() && completed_criteria == members.len(),
                total_criteria: members.len(),
                completed_criteria,
                id,
            }
        })
        .collect();

    let orphan_criteria: Vec<String> = criteria_out
        .iter()
        .filter(|c| c.story_id.is_none())
        .map(|c| c.id.clone())
        .collect();

    let has_work = !stories_out.is_empty() || !orphan_criteria.is_empty();
    let increment_complete = has_work
        && stories_out.iter().all(|s| s.complete)
        && criteria_out
            .iter()
            .filter(|c| c.story_id.is_none())
            .all(|c| c.complete);

    // A task is done only if every ledger line for it says so.
    let mut task_state: BTreeMap<&str, bool> = BTreeMap::new();
    for task in tasks {
        task_state
            .entry(task.id.as_str())
            .and_modify(|done| *done &= task.completed)
            .or_insert(task.completed);
    }
    let total_tasks = task_state.len();
    let completed_tasks = task_state.values().filter(|done| **done).count();

    let completed_criteria = criteria_out.iter().filter(|c| c.complete).count();
    let completed_stories = stories_out.iter().filter(|s| s.complete).count();

    CompletionReport {
        task_percent: percent(completed_tasks, total_tasks),
        criteria_percent: percent(completed_criteria, criteria_out.len()),
        story_percent: percent(completed_stories, stories_out.len()),
        criteria: criteria_out,
        stories: stories_out,
        orphan_criteria,
        unknown_criteria: unknown_criteria.into_iter().collect(),
        total_tasks,
        completed_tasks,
        increment_complete,
    }
}
