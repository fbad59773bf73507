pub mod fetch;

pub use fetch::{basename, grab_image};
