pub mod bulk;
pub mod catalog;
pub mod parser;
pub mod portal;
pub mod roll_numbers;
pub mod tally;
