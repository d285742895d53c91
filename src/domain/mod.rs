pub mod challenge;
pub mod day;

pub use challenge::{Challenge, ChallengeId, SwipeDirection};
pub use day::{DayPhase, DaySnapshot, UserProfile};
