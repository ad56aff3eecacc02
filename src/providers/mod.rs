pub mod market;
pub mod openai;
pub mod timed;
