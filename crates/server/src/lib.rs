pub mod session;

pub use session::{GameServerSession, Phase};
