pub mod fields;
pub mod names;
pub mod page;
pub mod patterns;

pub use page::PageProcessor;
pub use patterns::NutritionPatternSet;
