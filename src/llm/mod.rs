pub mod gemini;
pub mod media;
pub mod openai;

pub use gemini::GeminiImageClient;
pub use openai::OpenAiClient;
