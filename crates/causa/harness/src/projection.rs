//! Factor projections: how an agent turns the world into a bounded vector.

use causa_crypto::quantize;
use causa_types::ReplayModel;

use crate::world::{actions, GridWorld, MOVES};

/// Maps a world to `dim()` factors in [0, 1], at canonical precision so a
/// projected vector survives the kernel's normalization unchanged.
pub trait FactorProjection: Send + Sync {
    fn id(&self) -> &str;

    fn dim(&self) -> usize;

    fn project(&self, world: &GridWorld) -> Vec<f64>;
}

/// Remaining distance to the goal along each compass direction, scaled by
/// the grid span. A direction whose next cell is blocked pulls 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoalPull;

impl GoalPull {
    pub const ID: &'static str = "proj.goal_pull.v1";
}

impl FactorProjection for GoalPull {
    fn id(&self) -> &str {
        Self::ID
    }

    fn dim(&self) -> usize {
        MOVES.len()
    }

    fn project(&self, world: &GridWorld) -> Vec<f64> {
        let span = (world.size() - 1).max(1) as f64;
        let (agent, goal) = (world.agent(), world.goal());
        let dx = goal.x - agent.x;
        let dy = goal.y - agent.y;
        let distances = [(-dy).max(0), dy.max(0), dx.max(0), (-dx).max(0)];

        MOVES
            .iter()
            .zip(distances)
            .map(|((action, _, _), distance)| {
                let open = world.target(action).is_some_and(|c| world.is_open(c));
                if open {
                    quantize(distance as f64 / span).unwrap_or(0.0)
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// One logit per compass factor plus a small constant for `WAIT`, so an
/// all-zero vector waits.
pub fn compass_model() -> ReplayModel {
    let dim = MOVES.len();
    let mut w: Vec<Vec<f64>> = (0..dim)
        .map(|row| (0..dim).map(|col| if row == col { 1.0 } else { 0.0 }).collect())
        .collect();
    w.push(vec![0.0; dim]);

    let mut b = vec![0.0; dim];
    b.push(0.01);

    ReplayModel {
        actions: actions(),
        w,
        b,
    }
}
