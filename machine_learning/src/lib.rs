pub mod algo;
pub mod data;
mod error;
pub mod model;
pub mod weights;

pub use algo::{Algo, UpdateRule};
pub use data::{Batch, DataSource, InMemoryData};
pub use error::{MlErr, Result};
pub use model::{DenseModel, Metrics, ModelArch, TrainableModel};
pub use weights::{Shapes, Weights, shapes_from_weights, weights_from_shapes};
