#[derive(Clone)]
struct AppState {
    kernel: Arc<Mutex<FamilyKernel>>,
    env_secret: Option<String>,
}

impl AppState {
    fn new(kernel: FamilyKernel, env_secret: Option<String>) -> Self {
        Self {
            kernel: Arc::new(Mutex::new(kernel)),
            env_secret: env_secret.filter(|secret| !secret.trim().is_empty()),
        }
    }
}
