pub mod config;
pub mod conflicts;
pub mod group;
pub mod init;
pub mod side;
pub mod split;
pub mod stages;
pub mod submit;
