pub mod entities;
pub mod lifecycle;
pub mod product_ids;
pub mod repositories;
pub mod value_objects;
