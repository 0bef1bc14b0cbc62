mod assignment;
mod certificate;
mod progress;
mod quiz;
pub(crate) mod track;
mod user;

pub use assignment::*;
pub use certificate::*;
pub use progress::*;
pub use quiz::*;
pub use track::{NewTrack, NewVideo, Track, Video};
pub use user::*;
