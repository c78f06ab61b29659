pub mod autocrop;
pub mod controller;
pub mod geometry;
pub mod store;

pub use autocrop::detect_largest_contour;
pub use controller::{InteractionZone, RegionOfInterestController, RoiSnapshot, RoiState};
pub use geometry::{
    crop_for_frame, fit_rect, original_to_view, view_to_original, OriginalRect, ViewRect,
};
pub use store::{JsonFileStore, MemoryStore, PersistedRoi, RoiStore};
