pub mod cache;
pub mod compose;
pub mod corpus;
pub mod engine;
pub mod normalize;
pub mod query;
pub mod rank;
pub mod session;
pub mod store;
pub mod suggest;

pub type DocId = u32;

pub use compose::Answer;
pub use corpus::{CorpusIndex, RawFact};
pub use engine::{AnswerEngine, DomainRouter};
pub use query::Intent;
pub use rank::RankedResult;
pub use session::SessionContext;
pub use store::SessionStore;
