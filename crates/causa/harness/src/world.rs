//! Reference grid world.
//!
//! A square grid with one agent, one goal and a few obstacles, generated
//! from a seed. Moves into a wall or an obstacle leave the agent in place.
//! The kernel never sees this type; it sees only the snapshot digest and
//! whatever factors an agent projects from it.

use std::collections::BTreeSet;

use causa_crypto::{hash_serialize, quantize, CanonError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

pub const WAIT: &str = "WAIT";

/// Compass moves in factor order.
pub const MOVES: [(&str, i64, i64); 4] = [
    ("MOVE_N", 0, -1),
    ("MOVE_S", 0, 1),
    ("MOVE_E", 1, 0),
    ("MOVE_W", -1, 0),
];

/// Every action the world accepts, moves first.
pub fn actions() -> Vec<String> {
    MOVES
        .iter()
        .map(|(name, _, _)| name.to_string())
        .chain([WAIT.to_string()])
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Cell {
    pub x: i64,
    pub y: i64,
}

impl Cell {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn manhattan(self, other: Cell) -> i64 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    fn offset(self, dx: i64, dy: i64) -> Cell {
        Cell::new(self.x + dx, self.y + dy)
    }
}

/// Serialized view of the world, hashed into `env_snapshot_ref`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorldSnapshot {
    pub size: i64,
    pub agent: Cell,
    pub goal: Cell,
    pub obstacles: Vec<Cell>,
    pub tick: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GridWorld {
    size: i64,
    agent: Cell,
    goal: Cell,
    obstacles: BTreeSet<Cell>,
    tick: u64,
}

impl GridWorld {
    pub fn new(size: usize, agent: Cell, goal: Cell, obstacles: impl IntoIterator<Item = Cell>) -> Self {
        Self {
            size: size.max(2) as i64,
            agent,
            goal,
            obstacles: obstacles
                .into_iter()
                .filter(|c| *c != agent && *c != goal)
                .collect(),
            tick: 0,
        }
    }

    /// Seeded layout. The same `(size, obstacles, seed)` always yields the
    /// same world.
    pub fn generate(size: usize, obstacles: usize, seed: u64) -> Self {
        let size = size.max(2) as i64;
        let mut rng = StdRng::seed_from_u64(seed);

        let agent = random_cell(&mut rng, size);
        let goal = loop {
            let cell = random_cell(&mut rng, size);
            if cell != agent {
                break cell;
            }
        };

        let wanted = obstacles.min((size * size - 2) as usize);
        let mut blocked = BTreeSet::new();
        while blocked.len() < wanted {
            let cell = random_cell(&mut rng, size);
            if cell != agent && cell != goal {
                blocked.insert(cell);
            }
        }

        Self {
            size,
            agent,
            goal,
            obstacles: blocked,
            tick: 0,
        }
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn agent(&self) -> Cell {
        self.agent
    }

    pub fn goal(&self) -> Cell {
        self.goal
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn at_goal(&self) -> bool {
        self.agent == self.goal
    }

    pub fn is_open(&self, cell: Cell) -> bool {
        (0..self.size).contains(&cell.x)
            && (0..self.size).contains(&cell.y)
            && !self.obstacles.contains(&cell)
    }

    /// Cell `action` would move the agent to, if it is a move.
    pub fn target(&self, action: &str) -> Option<Cell> {
        MOVES
            .iter()
            .find(|(name, _, _)| *name == action)
            .map(|(_, dx, dy)| self.agent.offset(*dx, *dy))
    }

    /// Apply an executed action. Returns whether the agent moved.
    pub fn step(&mut self, action: &str) -> bool {
        self.tick += 1;
        match self.target(action) {
            Some(cell) if self.is_open(cell) => {
                self.agent = cell;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            size: self.size,
            agent: self.agent,
            goal: self.goal,
            obstacles: self.obstacles.iter().copied().collect(),
            tick: self.tick,
        }
    }

    pub fn snapshot_ref(&self) -> Result<String, CanonError> {
        hash_serialize(&self.snapshot())
    }

    /// Agent and goal coordinates scaled to [0, 1], in canonical precision.
    pub fn normalized_state(&self) -> Result<Vec<f64>, CanonError> {
        let span = (self.size - 1) as f64;
        [self.agent.x, self.agent.y, self.goal.x, self.goal.y]
            .into_iter()
            .map(|v| quantize(v as f64 / span))
            .collect()
    }
}

fn random_cell(rng: &mut StdRng, size: i64) -> Cell {
    Cell::new(rng.gen_range(0..size), rng.gen_range(0..size))
}
