use async_trait::async_trait;

/// Outcome of a service call; the error string lands in the response
/// frame's `error` field.
pub type ServiceResult<T> = Result<T, String>;

/// Seam between the gateway and whatever produces chat replies.
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Short tag reported by the health probe.
    fn name(&self) -> &'static str;

    /// Produce a reply for one inbound chat message.
    async fn chat(&self, message: &str) -> ServiceResult<String>;
}

/// Stand-in agent used when no brain is wired up.
pub struct MockAgent;

#[async_trait]
impl AgentService for MockAgent {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn chat(&self, message: &str) -> ServiceResult<String> {
        Ok(format!("MOCK: {message}"))
    }
}
