pub mod annotate;
pub mod bounding_box;
pub mod encode;
pub mod image_prep;
pub mod reconcile;
