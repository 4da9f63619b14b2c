pub mod game;
pub mod user;

pub use game::{parse_start_time, raw_participations, KillAttribution, MatchParticipation};
pub use user::UserIdentity;
