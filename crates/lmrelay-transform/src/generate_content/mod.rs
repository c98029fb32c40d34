pub mod claude2openai;
pub mod gemini2openai;
pub mod openai2claude;
pub mod openai2gemini;
