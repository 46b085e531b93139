pub mod changelog;
pub mod image;
pub mod product;
pub mod profile;
pub mod subdivision;
pub mod user;
