//! Embassy tasks of the logger
//!
//! | Task           | Executor                      | Role                          |
//! |----------------|-------------------------------|-------------------------------|
//! | `imu_sampler`  | interrupt executor, core 0    | 100 Hz alarm, IMU burst read  |
//! | `stop_button`  | interrupt executor, core 0    | debounced stop request        |
//! | `co2_poller`   | thread executor, core 0       | 20 Hz CO₂ poll into the cache |
//! | `control`      | thread executor, core 0       | lifecycle, formatting, buffer |
//! | `storage_writer` | executor on core 1          | drains ready buffers to SD    |

pub mod button;
pub mod co2;
pub mod control;
pub mod sampler;
pub mod writer;

pub use button::stop_button;
pub use co2::co2_poller;
pub use sampler::imu_sampler;
pub use writer::storage_writer;
