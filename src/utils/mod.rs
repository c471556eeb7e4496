pub mod decimal;
pub mod locks;
pub mod logger;
