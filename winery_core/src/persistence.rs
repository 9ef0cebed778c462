//! Storage collaborators for tasks, buildings and the rest of the game.
//!
//! The scheduler saves after every mutation and never waits on or retries a
//! failed write; in-memory state stays authoritative.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bevy::prelude::Resource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activities::WineryState;
use crate::calendar::GameCalendar;
use crate::staff::StaffRoster;
use crate::task::Task;
use crate::tools::Building;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary encoding failed: {0}")]
    Binary(#[from] bincode::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Active tasks together with the id counter, so ids are never handed out
/// twice across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub next_id: u64,
    pub tasks: Vec<Task>,
}

pub trait TaskStore: Send + Sync {
    /// An empty snapshot when nothing has been stored yet.
    fn load_tasks(&self) -> Result<TaskSnapshot, PersistenceError>;
    fn save_tasks(&mut self, snapshot: &TaskSnapshot) -> Result<(), PersistenceError>;
}

pub trait BuildingStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load_buildings(&self) -> Result<Option<Vec<Building>>, PersistenceError>;
    fn store_buildings(&mut self, buildings: &[Building]) -> Result<(), PersistenceError>;
}

/// Everything outside tasks and buildings that a restored game depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedGame {
    pub state: WineryState,
    pub roster: StaffRoster,
    pub calendar: GameCalendar,
}

pub trait GameStateStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load_game(&self) -> Result<Option<SavedGame>, PersistenceError>;
    fn store_game(&mut self, game: &SavedGame) -> Result<(), PersistenceError>;
}

/// Buildings and game state behind one store.
pub trait WorldStore: BuildingStore + GameStateStore {}

impl<S: BuildingStore + GameStateStore> WorldStore for S {}

#[derive(Debug, Default)]
struct MemoryState {
    tasks: TaskSnapshot,
    buildings: Option<Vec<Building>>,
    game: Option<SavedGame>,
    task_saves: usize,
    fail_writes: bool,
}

/// In-process store. Clones share the same state, so a test can keep a
/// handle while the scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stored_tasks(&self) -> Vec<Task> {
        self.lock().tasks.tasks.clone()
    }

    pub fn stored_next_id(&self) -> u64 {
        self.lock().tasks.next_id
    }

    pub fn stored_game(&self) -> Option<SavedGame> {
        self.lock().game.clone()
    }

    pub fn task_saves(&self) -> usize {
        self.lock().task_saves
    }

    /// Make every subsequent write fail; existing contents are kept.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }
}

impl TaskStore for MemoryStore {
    fn load_tasks(&self) -> Result<TaskSnapshot, PersistenceError> {
        Ok(self.lock().tasks.clone())
    }

    fn save_tasks(&mut self, snapshot: &TaskSnapshot) -> Result<(), PersistenceError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(PersistenceError::Unavailable("memory store rejects writes".into()));
        }
        state.tasks = snapshot.clone();
        state.task_saves += 1;
        Ok(())
    }
}

impl BuildingStore for MemoryStore {
    fn load_buildings(&self) -> Result<Option<Vec<Building>>, PersistenceError> {
        Ok(self.lock().buildings.clone())
    }

    fn store_buildings(&mut self, buildings: &[Building]) -> Result<(), PersistenceError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(PersistenceError::Unavailable("memory store rejects writes".into()));
        }
        state.buildings = Some(buildings.to_vec());
        Ok(())
    }
}

impl GameStateStore for MemoryStore {
    fn load_game(&self) -> Result<Option<SavedGame>, PersistenceError> {
        Ok(self.lock().game.clone())
    }

    fn store_game(&mut self, game: &SavedGame) -> Result<(), PersistenceError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(PersistenceError::Unavailable("memory store rejects writes".into()));
        }
        state.game = Some(game.clone());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveFormat {
    #[default]
    Json,
    Bincode,
}

impl SaveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SaveFormat::Json => "json",
            SaveFormat::Bincode => "bin",
        }
    }

    fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>, PersistenceError> {
        match self {
            SaveFormat::Json => Ok(serde_json::to_vec_pretty(value)?),
            SaveFormat::Bincode => Ok(bincode::serialize(value)?),
        }
    }

    fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, PersistenceError> {
        match self {
            SaveFormat::Json => Ok(serde_json::from_slice(bytes)?),
            SaveFormat::Bincode => Ok(bincode::deserialize(bytes)?),
        }
    }
}

/// Directory-backed store: `tasks.<ext>`, `buildings.<ext>` and `game.<ext>`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    format: SaveFormat,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, format: SaveFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.dir.join(format!("tasks.{}", self.format.extension()))
    }

    pub fn buildings_path(&self) -> PathBuf {
        self.dir
            .join(format!("buildings.{}", self.format.extension()))
    }

    pub fn game_path(&self) -> PathBuf {
        self.dir.join(format!("game.{}", self.format.extension()))
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, PersistenceError> {
        match fs::read(path) {
            Ok(bytes) => self.format.decode(&bytes).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write through a sibling temp file so a crash never leaves a torn file.
    fn write<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), PersistenceError> {
        let bytes = self.format.encode(value)?;
        let write_err = |source| PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(write_err)?;
        let tmp = path.with_extension(format!("{}.tmp", self.format.extension()));
        fs::write(&tmp, bytes).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)
    }
}

impl TaskStore for FileStore {
    fn load_tasks(&self) -> Result<TaskSnapshot, PersistenceError> {
        Ok(self.read(&self.tasks_path())?.unwrap_or_default())
    }

    fn save_tasks(&mut self, snapshot: &TaskSnapshot) -> Result<(), PersistenceError> {
        self.write(&self.tasks_path(), snapshot)
    }
}

impl BuildingStore for FileStore {
    fn load_buildings(&self) -> Result<Option<Vec<Building>>, PersistenceError> {
        self.read(&self.buildings_path())
    }

    fn store_buildings(&mut self, buildings: &[Building]) -> Result<(), PersistenceError> {
        self.write(&self.buildings_path(), buildings)
    }
}

impl GameStateStore for FileStore {
    fn load_game(&self) -> Result<Option<SavedGame>, PersistenceError> {
        self.read(&self.game_path())
    }

    fn store_game(&mut self, game: &SavedGame) -> Result<(), PersistenceError> {
        self.write(&self.game_path(), game)
    }
}

/// Store for buildings and game state used by the app's persistence
/// systems. Tasks are saved by the scheduler itself.
#[derive(Resource, Default)]
pub struct GamePersistence {
    store: Option<Box<dyn WorldStore>>,
}

impl GamePersistence {
    pub fn new(store: impl WorldStore + 'static) -> Self {
        Self {
            store: Some(Box::new(store)),
        }
    }

    pub fn store_mut(&mut self) -> Option<&mut (dyn WorldStore + 'static)> {
        self.store.as_deref_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staff::Skills;
    use crate::task::TaskId;
    use crate::tools::{ToolInstance, ToolId, ToolKind};
    use std::time::{SystemTime, UNIX_EPOCH};
    use winery_runtime::{TaskActivity, TaskCategory, TaskKind};

    fn scratch_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!(
            "winery-core-{label}-{}-{nanos}",
            std::process::id()
        ))
    }

    fn sample_task() -> Task {
        let mut task = Task::new(
            TaskId(4),
            "Harvesting",
            TaskActivity::Harvesting,
            TaskKind::Progressive,
            TaskCategory::Field,
            120.0,
        );
        task.apply_work(30.0);
        task.params.insert("expectedYieldKg", 900.0);
        task
    }

    #[test]
    fn file_store_round_trips_json_tasks() {
        let dir = scratch_dir("json");
        let mut store = FileStore::new(&dir, SaveFormat::Json);
        assert_eq!(store.load_tasks().unwrap(), TaskSnapshot::default());

        let snapshot = TaskSnapshot {
            next_id: 9,
            tasks: vec![sample_task()],
        };
        store.save_tasks(&snapshot).unwrap();
        assert!(store.tasks_path().exists());
        assert_eq!(store.load_tasks().unwrap(), snapshot);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn file_store_round_trips_binary_buildings() {
        let dir = scratch_dir("bin");
        let mut store = FileStore::new(&dir, SaveFormat::Bincode);
        assert!(store.load_buildings().unwrap().is_none());

        let mut shed = Building::new("tool_shed", "Tool Shed", 3);
        shed.tools.push(ToolInstance::new(
            ToolId::new("Harvest Bins", 1),
            ToolKind::Individual,
            1.2,
            TaskCategory::Field,
        ));
        store.store_buildings(std::slice::from_ref(&shed)).unwrap();
        assert_eq!(store.load_buildings().unwrap(), Some(vec![shed]));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_file_reports_decode_error() {
        let dir = scratch_dir("corrupt");
        fs::create_dir_all(&dir).unwrap();
        let store = FileStore::new(&dir, SaveFormat::Json);
        fs::write(store.tasks_path(), b"{ not json").unwrap();
        assert!(matches!(
            store.load_tasks(),
            Err(PersistenceError::Json(_))
        ));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn memory_store_shares_state_between_clones() {
        let handle = MemoryStore::new();
        let mut owned = handle.clone();
        owned
            .save_tasks(&TaskSnapshot {
                next_id: 5,
                tasks: vec![sample_task()],
            })
            .unwrap();
        assert_eq!(handle.task_saves(), 1);
        assert_eq!(handle.stored_tasks().len(), 1);
        assert_eq!(handle.stored_next_id(), 5);

        handle.set_fail_writes(true);
        assert!(owned.save_tasks(&TaskSnapshot::default()).is_err());
        assert_eq!(handle.stored_tasks().len(), 1);
    }

    fn sample_game() -> SavedGame {
        let mut roster = StaffRoster::new();
        roster.hire("Ana Rossi", 50.0, Skills::uniform(0.8));
        let mut calendar = GameCalendar::new(4);
        calendar.advance();
        SavedGame {
            state: WineryState {
                money: 1234.5,
                grapes_kg: 80.0,
                ..WineryState::default()
            },
            roster,
            calendar,
        }
    }

    #[test]
    fn file_store_round_trips_game_state_in_both_formats() {
        for format in [SaveFormat::Json, SaveFormat::Bincode] {
            let dir = scratch_dir("game");
            let mut store = FileStore::new(&dir, format);
            assert_eq!(store.load_game().unwrap(), None);

            let game = sample_game();
            store.store_game(&game).unwrap();
            assert!(store.game_path().exists());
            assert_eq!(store.load_game().unwrap(), Some(game));

            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn memory_store_keeps_game_state() {
        let handle = MemoryStore::new();
        let mut persistence = GamePersistence::new(handle.clone());
        let store = persistence.store_mut().unwrap();
        store.store_game(&sample_game()).unwrap();
        assert_eq!(handle.stored_game(), Some(sample_game()));
    }
}
