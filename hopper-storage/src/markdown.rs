//! Markdown file storage backend
//!
//! Human-readable, git-friendly storage: one markdown file per task with
//! YAML frontmatter carrying the structured fields and the body carrying
//! the free-text description.
//!
//! Directory structure:
//!
//! ```text
//! base_path/
//! ├── tasks/
//! │   └── {task_id}.md
//! └── .index/
//!     └── tasks.json
//! ```
//!
//! The `.index/tasks.json` sidecar mirrors the by-status / by-tag /
//! by-project views. It is rebuildable from scratch and never authoritative:
//! reads always go to the task files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hopper_core::{HopperError, Result, Task, TaskStatus};

use crate::traits::{apply_transition, sort_for_listing, Page, TaskFilter, TaskPatch, TaskSpec, TaskStore};

/// Parsed markdown document: YAML frontmatter + free-text body
#[derive(Debug, Clone)]
struct MarkdownDocument {
    frontmatter: Task,
    body: String,
}

impl MarkdownDocument {
    fn from_task(task: &Task) -> Self {
        let mut frontmatter = task.clone();
        let body = frontmatter.description.take().unwrap_or_default();
        Self { frontmatter, body }
    }

    fn into_task(self) -> Task {
        let mut task = self.frontmatter;
        if !self.body.is_empty() {
            task.description = Some(self.body);
        }
        task
    }

    fn parse(text: &str) -> Result<Self> {
        let rest = text
            .strip_prefix("---\n")
            .ok_or_else(|| HopperError::Storage("missing frontmatter delimiter".into()))?;
        let (fm, body) = rest
            .split_once("\n---\n")
            .map(|(fm, body)| (fm, body.trim()))
            .or_else(|| rest.strip_suffix("\n---").map(|fm| (fm, "")))
            .ok_or_else(|| HopperError::Storage("unterminated frontmatter".into()))?;

        let frontmatter: Task = serde_yaml::from_str(fm)
            .map_err(|e| HopperError::Storage(format!("invalid frontmatter: {e}")))?;

        Ok(Self {
            frontmatter,
            body: body.to_string(),
        })
    }

    fn render(&self) -> Result<String> {
        let fm = serde_yaml::to_string(&self.frontmatter)
            .map_err(|e| HopperError::Storage(format!("frontmatter render: {e}")))?;
        Ok(format!("---\n{fm}---\n\n{}\n", self.body))
    }
}

/// Entry in the `.index/tasks.json` sidecar
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    title: String,
    status: TaskStatus,
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    file: String,
    updated_at: DateTime<Utc>,
}

/// The sidecar document. Rebuildable, not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TaskIndex {
    tasks: BTreeMap<String, IndexEntry>,
    by_status: BTreeMap<String, Vec<String>>,
    by_tag: BTreeMap<String, Vec<String>>,
    by_project: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    generated_at: Option<DateTime<Utc>>,
}

impl TaskIndex {
    fn insert(&mut self, task: &Task, file: String) {
        self.remove(&task.id);
        let status_key = task.status.to_string();
        self.by_status
            .entry(status_key)
            .or_default()
            .push(task.id.clone());
        for tag in &task.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .push(task.id.clone());
        }
        if let Some(project) = &task.project {
            self.by_project
                .entry(project.clone())
                .or_default()
                .push(task.id.clone());
        }
        self.tasks.insert(
            task.id.clone(),
            IndexEntry {
                title: task.title.clone(),
                status: task.status,
                tags: task.tags.clone(),
                project: task.project.clone(),
                file,
                updated_at: task.updated_at,
            },
        );
    }

    fn remove(&mut self, task_id: &str) {
        if self.tasks.remove(task_id).is_none() {
            return;
        }
        for ids in self.by_status.values_mut() {
            ids.retain(|id| id != task_id);
        }
        for ids in self.by_tag.values_mut() {
            ids.retain(|id| id != task_id);
        }
        for ids in self.by_project.values_mut() {
            ids.retain(|id| id != task_id);
        }
    }
}

/// Markdown-backed [`TaskStore`]
pub struct MarkdownTaskStore {
    base_path: PathBuf,
    tasks_path: PathBuf,
    index_path: PathBuf,
    index: Mutex<TaskIndex>,
}

impl MarkdownTaskStore {
    /// Open (or initialize) a markdown store rooted at `base_path`
    pub fn open(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        let tasks_path = base_path.join("tasks");
        let index_path = base_path.join(".index");

        fs::create_dir_all(&tasks_path).map_err(|e| HopperError::Storage(e.to_string()))?;
        fs::create_dir_all(&index_path).map_err(|e| HopperError::Storage(e.to_string()))?;

        let gitignore = index_path.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, "*\n").map_err(|e| HopperError::Storage(e.to_string()))?;
        }

        let store = Self {
            base_path,
            tasks_path,
            index_path,
            index: Mutex::new(TaskIndex::default()),
        };
        store.load_index()?;
        Ok(store)
    }

    fn task_file(&self, id: &str) -> PathBuf {
        self.tasks_path.join(format!("{id}.md"))
    }

    fn index_file(&self) -> PathBuf {
        self.index_path.join("tasks.json")
    }

    fn read_task(&self, path: &Path) -> Result<Option<Task>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path).map_err(|e| HopperError::Storage(e.to_string()))?;
        Ok(Some(MarkdownDocument::parse(&text)?.into_task()))
    }

    fn write_task(&self, task: &Task) -> Result<()> {
        let doc = MarkdownDocument::from_task(task);
        let path = self.task_file(&task.id);
        fs::write(&path, doc.render()?).map_err(|e| HopperError::Storage(e.to_string()))?;

        let rel = path
            .strip_prefix(&self.base_path)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();
        let mut index = self.index.lock();
        index.insert(task, rel);
        self.save_index(&index)
    }

    fn load_all(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        let entries =
            fs::read_dir(&self.tasks_path).map_err(|e| HopperError::Storage(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| HopperError::Storage(e.to_string()))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "md") {
                match self.read_task(&path)? {
                    Some(task) => tasks.push(task),
                    None => warn!(path = %path.display(), "task file vanished during scan"),
                }
            }
        }
        Ok(tasks)
    }

    fn load_index(&self) -> Result<()> {
        let file = self.index_file();
        if file.exists() {
            let text = fs::read_to_string(&file).map_err(|e| HopperError::Storage(e.to_string()))?;
            if let Ok(index) = serde_json::from_str::<TaskIndex>(&text) {
                *self.index.lock() = index;
                return Ok(());
            }
            warn!("task index unreadable, rebuilding");
        }
        self.rebuild_index()?;
        Ok(())
    }

    fn save_index(&self, index: &TaskIndex) -> Result<()> {
        let mut snapshot = index.clone();
        snapshot.generated_at = Some(Utc::now());
        let text = serde_json::to_string_pretty(&snapshot)?;
        fs::write(self.index_file(), text).map_err(|e| HopperError::Storage(e.to_string()))
    }

    /// Rebuild the sidecar index from the task files. Returns the number of
    /// tasks indexed.
    pub fn rebuild_index(&self) -> Result<usize> {
        let tasks = self.load_all()?;
        let mut index = TaskIndex::default();
        for task in &tasks {
            index.insert(task, format!("tasks/{}.md", task.id));
        }
        let count = index.tasks.len();
        let mut guard = self.index.lock();
        *guard = index;
        self.save_index(&guard)?;
        debug!(count, "rebuilt task index");
        Ok(count)
    }

    /// Task ids currently indexed under a status (index view, may lag files)
    #[must_use]
    pub fn indexed_by_status(&self, status: TaskStatus) -> Vec<String> {
        self.index
            .lock()
            .by_status
            .get(&status.to_string())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskStore for MarkdownTaskStore {
    async fn create(&self, spec: TaskSpec) -> Result<Task> {
        let task = spec.into_task()?;
        self.write_task(&task)?;
        debug!(task_id = %task.id, "created task file");
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        self.read_task(&self.task_file(id))
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let mut task = self
            .read_task(&self.task_file(id))?
            .ok_or_else(|| HopperError::not_found("task", id))?;
        patch.apply(&mut task);
        self.write_task(&task)?;
        Ok(task)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.task_file(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| HopperError::Storage(e.to_string()))?;
        let mut index = self.index.lock();
        index.remove(id);
        self.save_index(&index)?;
        Ok(true)
    }

    async fn list(&self, filter: &TaskFilter, page: Page) -> Result<(Vec<Task>, usize)> {
        let mut matches: Vec<Task> = self
            .load_all()?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        sort_for_listing(&mut matches);
        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok((items, total))
    }

    async fn search(
        &self,
        query: &str,
        filter: &TaskFilter,
        page: Page,
    ) -> Result<(Vec<Task>, usize)> {
        let needle = query.to_lowercase();
        let mut matches: Vec<Task> = self
            .load_all()?
            .into_iter()
            .filter(|t| filter.matches(t) && t.search_text().to_lowercase().contains(&needle))
            .collect();
        sort_for_listing(&mut matches);
        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok((items, total))
    }

    async fn transition_status(&self, id: &str, new_status: TaskStatus) -> Result<Task> {
        let mut task = self
            .read_task(&self.task_file(id))?
            .ok_or_else(|| HopperError::not_found("task", id))?;
        apply_transition(&mut task, new_status)?;
        self.write_task(&task)?;
        Ok(task)
    }

    async fn assign_instance(
        &self,
        id: &str,
        expected: Option<&str>,
        new_instance: Option<String>,
    ) -> Result<Task> {
        let mut task = self
            .read_task(&self.task_file(id))?
            .ok_or_else(|| HopperError::not_found("task", id))?;

        if task.instance_id.as_deref() != expected {
            return Err(HopperError::ConflictingUpdate);
        }

        task.instance_id = new_instance;
        task.updated_at = Utc::now();
        self.write_task(&task)?;
        Ok(task)
    }

    async fn all(&self) -> Result<Vec<Task>> {
        let mut tasks = self.load_all()?;
        sort_for_listing(&mut tasks);
        Ok(tasks)
    }
}
