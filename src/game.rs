//! Session snapshot as served by the game backend.
//!
//! Field names follow the backend's camelCase JSON. Only positions are modelled
//! on the board; movement legality stays with the backend.

use serde::{
    Deserialize,
    Serialize,
};

pub const PIECES_PER_PLAYER: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameStatus {
    Waiting,
    Active,
    Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RankedStatus {
    Ranked,
    Unranked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameMode {
    Timed,
    Challenge,
    Advanced,
    Experimental,
    Custom,
    Demo,
    Team,
    SuperLudo,
    Quick,
    Tournament,
    Classic,
    TwoVsTwo,
    Practice,
    Bonus,
    Master,
    CopyClassic,
    CopyFast,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePiece {
    pub id: u8,
    pub position: u32,
    pub is_in_home: bool,
    pub is_finished: bool,
}

impl GamePiece {
    pub fn at_home(id: u8, position: u32) -> Self {
        Self {
            id,
            position,
            is_in_home: true,
            is_finished: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerBoard {
    pub player: String,
    pub pieces: Vec<GamePiece>,
}

impl PlayerBoard {
    pub fn new(player: impl Into<String>, start: u32) -> Self {
        let pieces = (0..PIECES_PER_PLAYER as u8)
            .map(|id| GamePiece::at_home(id, start))
            .collect();
        Self {
            player: player.into(),
            pieces,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub id: String,
    pub status: GameStatus,
    pub bet_amount: f64,
    pub mode: GameMode,
    pub created_at: i64,
    #[serde(default)]
    pub winner: Option<String>,
    pub is_demo: bool,
    pub players: Vec<String>,
    pub ranked_status: RankedStatus,
    #[serde(default)]
    pub board: Vec<PlayerBoard>,
    #[serde(default)]
    pub last_roll: Option<u8>,
}

impl GameSession {
    /// Candidate snapshot with one piece placed at `position`, used for
    /// optimistic moves. Returns `None` if the player or piece is unknown.
    pub fn with_piece_at(&self, player: &str, piece: u8, position: u32) -> Option<Self> {
        let mut next = self.clone();
        let target = next
            .board
            .iter_mut()
            .find(|board| board.player == player)?
            .pieces
            .iter_mut()
            .find(|p| p.id == piece)?;
        target.position = position;
        target.is_in_home = false;
        Some(next)
    }

    pub fn with_last_roll(&self, value: u8) -> Self {
        Self {
            last_roll: Some(value),
            ..self.clone()
        }
    }

    pub fn piece(&self, player: &str, piece: u8) -> Option<&GamePiece> {
        self.board
            .iter()
            .find(|board| board.player == player)?
            .pieces
            .iter()
            .find(|p| p.id == piece)
    }

    pub fn is_over(&self) -> bool {
        self.status == GameStatus::Completed
    }
}
