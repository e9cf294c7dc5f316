#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    /// Upper bound on steps executed within one turn.
    pub max_steps: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { max_steps: 16 }
    }
}

#[derive(Clone, Debug)]
pub struct ValidationConfig {
    pub min_prompt_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_prompt_length: 10,
        }
    }
}
