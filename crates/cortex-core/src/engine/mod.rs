//! The six typed memory engines and the `BaseEngine` template they share.

pub mod base;
pub mod episodic;
pub mod factual;
pub mod procedural;
pub mod semantic;
pub mod session;
pub mod working;

pub use base::{BaseEngine, EngineSchema, SearchHit, SearchQuery};
pub use episodic::EpisodicEngine;
pub use factual::FactualEngine;
pub use procedural::ProceduralEngine;
pub use semantic::SemanticEngine;
pub use session::{SessionContext, SessionEngine};
pub use working::WorkingEngine;
