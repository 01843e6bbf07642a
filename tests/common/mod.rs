use std::path::PathBuf;

use localragd::config::AppConfig;

/// A throwaway `AppConfig` rooted at a fresh temp directory, pointed at the
/// given mock upstream URL. Every integration test gets its own data/logs
/// dir so runs never interfere with each other.
pub fn test_config(data_root: &std::path::Path, ollama_url: String) -> AppConfig {
    AppConfig {
        ollama_url,
        embedding_model: "nomic-embed-text".to_string(),
        chat_model: "llama3.1:8b".to_string(),
        chunk_size: 1000,
        chunk_overlap: 200,
        top_k: 5,
        min_score: 0.0,
        max_context_tokens: 4000,
        data_dir: data_root.join("data"),
        logs_dir: data_root.join("logs"),
        port: 0,
    }
}

pub fn write_file(dir: &std::path::Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write fixture file");
    path
}

/// A fixed-dimension embedding vector, so every chunk/query ends up
/// trivially similar to every other one regardless of content.
pub const STUB_EMBEDDING: [f32; 3] = [0.1, 0.2, 0.3];

pub fn ndjson_chat_body(tokens: &[&str]) -> String {
    let mut body = String::new();
    for t in tokens {
        body.push_str(&format!(
            r#"{{"message":{{"content":"{}"}},"done":false}}"#,
            t
        ));
        body.push('\n');
    }
    body.push_str(r#"{"message":{"content":""},"done":true}"#);
    body.push('\n');
    body
}
