pub mod components;
pub mod compose;
pub mod normalize;

pub use components::score_components;
pub use compose::compose_scores;
pub use normalize::{normalize, NormalizedMatrix};
