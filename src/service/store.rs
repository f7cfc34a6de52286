//! In-memory todo list.
//!
//! One `Mutex` guards the whole list. It is held only for the list access
//! itself, never across an await point or an exporter call.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::generate_todo_id;

/// One todo item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub title: String,
    pub completed: bool,
}

/// Body of a create request. `completed` defaults to false.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTodo {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

/// Body of an update request; replaces title and completion flag.
#[derive(Debug, Clone, Deserialize)]
pub struct TodoUpdate {
    pub title: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("todo {0} not found")]
    NotFound(String),
}

/// Shared todo list.
#[derive(Debug, Default)]
pub struct TodoStore {
    todos: Mutex<Vec<Todo>>,
}

impl TodoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the single starter item with id `1`.
    pub fn seeded() -> Self {
        Self {
            todos: Mutex::new(vec![Todo {
                id: "1".into(),
                title: "Learn OpenTelemetry".into(),
                completed: false,
            }]),
        }
    }

    // Mutations never leave the list half-written, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Vec<Todo>> {
        self.todos.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of all items in insertion order.
    pub fn list(&self) -> Vec<Todo> {
        self.lock().clone()
    }

    pub fn get(&self, id: &str) -> Result<Todo, StoreError> {
        self.lock()
            .iter()
            .find(|todo| todo.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Append a new item under a freshly generated id.
    pub fn create(&self, new: NewTodo) -> Todo {
        let todo = Todo {
            id: generate_todo_id(),
            title: new.title,
            completed: new.completed,
        };
        self.lock().push(todo.clone());
        todo
    }

    pub fn update(&self, id: &str, update: TodoUpdate) -> Result<Todo, StoreError> {
        let mut todos = self.lock();
        let todo = todos
            .iter_mut()
            .find(|todo| todo.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        todo.title = update.title;
        todo.completed = update.completed;
        Ok(todo.clone())
    }

    pub fn delete(&self, id: &str) -> Result<Todo, StoreError> {
        let mut todos = self.lock();
        let index = todos
            .iter()
            .position(|todo| todo.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(todos.remove(index))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
