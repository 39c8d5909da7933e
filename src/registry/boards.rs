use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

use super::{InitGate, RegistryError};
use crate::model::{BoardDescriptor, SiteDescriptor};
use crate::storage::{Database, StoredBoard};

/// A board known to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChanBoard {
    pub descriptor: BoardDescriptor,
    pub name: Option<String>,
    /// Boards the user follows; only active boards are scanned by watch filters.
    pub active: bool,
}

impl ChanBoard {
    fn from_stored(stored: StoredBoard) -> Self {
        Self {
            descriptor: BoardDescriptor::create(&stored.site, &stored.code),
            name: stored.name,
            active: stored.active,
        }
    }

    fn to_stored(&self) -> StoredBoard {
        StoredBoard {
            site: self.descriptor.site.name().to_string(),
            code: self.descriptor.code().to_string(),
            name: self.name.clone(),
            active: self.active,
        }
    }
}

pub struct BoardRegistry {
    db: Database,
    gate: InitGate,
    boards: RwLock<BTreeMap<BoardDescriptor, ChanBoard>>,
}

impl BoardRegistry {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            gate: InitGate::new("board"),
            boards: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load persisted boards. Must be called once before use.
    pub async fn initialize(&self) -> Result<(), RegistryError> {
        self.gate.begin()?;

        match self.db.load_boards().await {
            Ok(stored) => {
                let mut boards = self.boards.write();
                for board in stored.into_iter().map(ChanBoard::from_stored) {
                    boards.insert(board.descriptor.clone(), board);
                }
                tracing::info!(boards = boards.len(), "Board registry initialized");
                drop(boards);
                self.gate.finish(true);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load boards");
                self.gate.finish(false);
                Err(RegistryError::Storage(e))
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub async fn await_initialized(&self) -> Result<(), RegistryError> {
        self.gate.wait().await
    }

    pub fn by_descriptor(&self, descriptor: &BoardDescriptor) -> Option<ChanBoard> {
        self.boards.read().get(descriptor).cloned()
    }

    /// Visit active boards, optionally restricted to `only`.
    pub fn view_all_active(
        &self,
        only: Option<&BTreeSet<BoardDescriptor>>,
        mut visitor: impl FnMut(&ChanBoard),
    ) {
        let boards = self.boards.read();
        match only {
            Some(subset) => subset
                .iter()
                .filter_map(|descriptor| boards.get(descriptor))
                .filter(|board| board.active)
                .for_each(&mut visitor),
            None => boards
                .values()
                .filter(|board| board.active)
                .for_each(&mut visitor),
        }
    }

    pub fn active_boards(&self) -> Vec<BoardDescriptor> {
        let mut active = Vec::new();
        self.view_all_active(None, |board| active.push(board.descriptor.clone()));
        active
    }

    pub fn all_boards(&self) -> Vec<ChanBoard> {
        self.boards.read().values().cloned().collect()
    }

    /// Register boards, keeping the active flag of boards already known.
    pub async fn add_boards(&self, new_boards: Vec<ChanBoard>) -> Result<(), RegistryError> {
        self.gate.ensure_ready()?;

        let merged: Vec<ChanBoard> = {
            let boards = self.boards.read();
            new_boards
                .into_iter()
                .map(|mut board| {
                    if let Some(existing) = boards.get(&board.descriptor) {
                        board.active = existing.active;
                    }
                    board
                })
                .collect()
        };

        let stored: Vec<StoredBoard> = merged.iter().map(ChanBoard::to_stored).collect();
        self.db.upsert_boards(&stored).await?;

        let mut boards = self.boards.write();
        for board in merged {
            boards.insert(board.descriptor.clone(), board);
        }
        Ok(())
    }

    /// Activate or deactivate boards of `site`.
    ///
    /// Unknown boards are ignored. Returns `true` if any board changed state.
    pub async fn activate_deactivate(
        &self,
        site: &SiteDescriptor,
        codes: &BTreeSet<String>,
        active: bool,
    ) -> Result<bool, RegistryError> {
        self.gate.ensure_ready()?;

        let to_change: Vec<String> = {
            let boards = self.boards.read();
            codes
                .iter()
                .filter(|code| {
                    boards
                        .get(&BoardDescriptor::new(site.clone(), code.as_str()))
                        .is_some_and(|board| board.active != active)
                })
                .cloned()
                .collect()
        };

        if to_change.is_empty() {
            return Ok(false);
        }

        self.db
            .set_boards_active(site.name(), &to_change, active)
            .await?;

        let mut boards = self.boards.write();
        for code in &to_change {
            if let Some(board) = boards.get_mut(&BoardDescriptor::new(site.clone(), code.as_str())) {
                board.active = active;
            }
        }

        tracing::info!(site = %site, boards = to_change.len(), active, "Boards updated");
        Ok(true)
    }
}
