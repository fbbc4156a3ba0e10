pub mod so3;

pub use so3::SO3;
