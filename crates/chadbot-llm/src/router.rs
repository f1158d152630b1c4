//! The tool-calling loop.
//!
//! `LlmRouter::chat` owns one LLM turn: it builds the system prompt from the
//! current plugin documentation, snapshots the registered skills as tools,
//! and loops provider call → tool execution → reply append until the model
//! answers without tool calls.
//!
//! Failure policy: a single tool call failing (timeout, plugin disconnect,
//! skill error) produces an `"Error: …"` tool-role reply and the loop
//! continues; the model is expected to react. Only provider transport
//! failures, caller cancellation, and the iteration backstop abort the turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chadbot_core::chat::{ChatMessage, DeferredAttachment, ToolCall, ToolDescriptor};
use chadbot_core::error::{BrokerError, BrokerResult, RouterError, RouterResult};

use crate::provider::ProviderRegistry;
use crate::prune::prune_history;

/// Fixed instruction prefix of every system prompt.
const SYSTEM_PREAMBLE: &str = "You are a helpful assistant. You may only use the tools \
provided to you in this conversation; never invent tool names or call tools that are not \
listed. When no tool applies, answer directly.";

// =============================================================================
// Seams
// =============================================================================

/// Chat context forwarded to skill invocations.
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    pub chat_id: String,
    pub user_id: String,
}

/// The result of executing one tool call.
#[derive(Debug, Clone, Default)]
pub struct ToolReply {
    /// Text handed back to the model.
    pub content: String,
    /// Auxiliary messages the skill wants displayed after the assistant
    /// reply; collected across the turn and surfaced on [`ChatOutcome`].
    pub deferred: Vec<DeferredAttachment>,
}

/// Executes tool calls. The broker's bridge resolves the skill's owning
/// plugin and performs the correlated request/response over its stream.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Runs one call. `cancel` fires when the turn is abandoned; the
    /// executor should cancel its in-flight request and return promptly.
    async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ChatContext,
        cancel: &CancellationToken,
    ) -> BrokerResult<ToolReply>;
}

/// Supplies the current tool list and per-plugin documentation.
pub trait ToolSource: Send + Sync {
    /// Snapshot of every registered skill as a tool descriptor.
    fn tools(&self) -> Vec<ToolDescriptor>;

    /// `(plugin name, markdown)` for every distinct plugin that currently
    /// has at least one registered skill and a documentation blob.
    fn plugin_docs(&self) -> Vec<(String, String)>;
}

// =============================================================================
// Configuration
// =============================================================================

/// Tunables for the tool-calling loop. The defaults are part of the broker's
/// contract with plugins.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Per-call deadline for a skill invocation.
    pub skill_timeout: Duration,
    /// Tool results longer than this are truncated with a marker.
    pub max_tool_result_bytes: usize,
    /// Tool exchanges kept when pruning history.
    pub keep_exchanges: usize,
    /// Backstop on provider iterations per turn.
    pub max_iterations: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            skill_timeout: Duration::from_secs(30),
            max_tool_result_bytes: 16_000,
            keep_exchanges: 10,
            max_iterations: 25,
        }
    }
}

/// The completed turn.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    /// Final assistant text.
    pub content: String,
    /// Audit trail of every tool call executed this turn, in order.
    pub tool_calls: Vec<ToolCall>,
    /// Auxiliary messages collected from skills during the turn.
    pub deferred_attachments: Vec<DeferredAttachment>,
}

// =============================================================================
// Router
// =============================================================================

/// Drives LLM turns against the registered providers.
pub struct LlmRouter {
    providers: Arc<ProviderRegistry>,
    source: Arc<dyn ToolSource>,
    executor: Arc<dyn ToolExecutor>,
    config: RouterConfig,
}

impl LlmRouter {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        source: Arc<dyn ToolSource>,
        executor: Arc<dyn ToolExecutor>,
        config: RouterConfig,
    ) -> Self {
        Self {
            providers,
            source,
            executor,
            config,
        }
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Runs one turn. `messages` is the caller's transcript without a system
    /// prompt; the router prepends its own.
    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        provider_name: &str,
        ctx: ChatContext,
        cancel: CancellationToken,
    ) -> RouterResult<ChatOutcome> {
        let provider = self.providers.select(provider_name)?;
        let tools = self.source.tools();

        let mut transcript = Vec::with_capacity(messages.len() + 1);
        transcript.push(ChatMessage::system(self.build_system_prompt()));
        transcript.extend(messages);

        debug!(
            provider = provider.name(),
            tools = tools.len(),
            chat_id = %ctx.chat_id,
            "Starting LLM turn"
        );

        let mut audit: Vec<ToolCall> = Vec::new();
        let mut deferred: Vec<DeferredAttachment> = Vec::new();

        for iteration in 1..=self.config.max_iterations {
            let response = tokio::select! {
                r = provider.chat(&transcript, &tools) => r?,
                () = cancel.cancelled() => return Err(RouterError::Cancelled),
            };

            if response.tool_calls.is_empty() {
                info!(
                    iterations = iteration,
                    calls = audit.len(),
                    chat_id = %ctx.chat_id,
                    "LLM turn complete"
                );
                return Ok(ChatOutcome {
                    content: response.content,
                    tool_calls: audit,
                    deferred_attachments: deferred,
                });
            }

            let calls = response.tool_calls.clone();
            transcript.push(ChatMessage::assistant_with_calls(response.content, calls.clone()));

            // Sequential execution in emission order; replies are appended in
            // the same order, which providers require.
            for call in calls {
                let reply = self.execute_call(&call, &ctx, &cancel).await?;
                audit.push(call.clone());
                transcript.push(ChatMessage::tool(reply.content, call.id));
                deferred.extend(reply.deferred);
            }

            prune_history(&mut transcript, self.config.keep_exchanges);
        }

        Err(RouterError::IterationLimit(self.config.max_iterations))
    }

    /// Executes one call, converting every per-call failure into an error
    /// text reply. Caller cancellation is the only error that escapes.
    async fn execute_call(
        &self,
        call: &ToolCall,
        ctx: &ChatContext,
        cancel: &CancellationToken,
    ) -> RouterResult<ToolReply> {
        debug!(skill = %call.name, call_id = %call.id, "Executing tool call");

        let outcome = tokio::select! {
            r = tokio::time::timeout(
                self.config.skill_timeout,
                self.executor.execute(call, ctx, cancel),
            ) => match r {
                Ok(inner) => inner,
                Err(_) => Err(BrokerError::InvocationTimeout(self.config.skill_timeout)),
            },
            () = cancel.cancelled() => Err(BrokerError::Cancelled),
        };

        match outcome {
            Ok(mut reply) => {
                reply.content = truncate_result(reply.content, self.config.max_tool_result_bytes);
                Ok(reply)
            }
            Err(BrokerError::Cancelled) => Err(RouterError::Cancelled),
            Err(e) => {
                warn!(skill = %call.name, error = %e, "Tool call failed");
                Ok(ToolReply {
                    content: format!("Error: {e}"),
                    deferred: Vec::new(),
                })
            }
        }
    }

    fn build_system_prompt(&self) -> String {
        let mut prompt = String::from(SYSTEM_PREAMBLE);
        for (plugin, docs) in self.source.plugin_docs() {
            prompt.push_str("\n\n## Plugin: ");
            prompt.push_str(&plugin);
            prompt.push_str("\n\n");
            prompt.push_str(docs.trim_end());
        }
        prompt
    }
}

/// Truncates `content` to at most `max_bytes` of UTF-8, appending a marker
/// that states the original size.
fn truncate_result(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }
    let original = content.len();
    let mut cut = max_bytes;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = content[..cut].to_string();
    truncated.push_str(&format!("\n[truncated: result was {original} bytes]"));
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Provider, ProviderResponse};
    use chadbot_core::chat::Role;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that replays a scripted sequence of responses and records
    /// the transcript it was called with.
    struct ScriptedProvider {
        script: Mutex<Vec<ProviderResponse>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<ProviderResponse>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolDescriptor],
        ) -> RouterResult<ProviderResponse> {
            self.seen.lock().push(messages.to_vec());
            let mut script = self.script.lock();
            if script.is_empty() {
                return Ok(ProviderResponse::text("done"));
            }
            Ok(script.remove(0))
        }
    }

    struct EmptySource;

    impl ToolSource for EmptySource {
        fn tools(&self) -> Vec<ToolDescriptor> {
            Vec::new()
        }

        fn plugin_docs(&self) -> Vec<(String, String)> {
            vec![("calc".into(), "Adds numbers.".into())]
        }
    }

    /// Executor backed by a closure over the call name.
    struct FnExecutor<F>(F);

    #[async_trait]
    impl<F> ToolExecutor for FnExecutor<F>
    where
        F: Fn(&ToolCall) -> BrokerResult<ToolReply> + Send + Sync,
    {
        async fn execute(
            &self,
            call: &ToolCall,
            _ctx: &ChatContext,
            _cancel: &CancellationToken,
        ) -> BrokerResult<ToolReply> {
            (self.0)(call)
        }
    }

    fn router_with(
        provider: Arc<dyn Provider>,
        executor: Arc<dyn ToolExecutor>,
        config: RouterConfig,
    ) -> LlmRouter {
        let providers = Arc::new(ProviderRegistry::new());
        providers.register(provider);
        LlmRouter::new(providers, Arc::new(EmptySource), executor, config)
    }

    fn tool_call(id: &str, name: &str, args: &[(&str, &str)]) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn single_skill_round_trip() {
        let provider = ScriptedProvider::new(vec![
            ProviderResponse {
                content: String::new(),
                tool_calls: vec![tool_call("t1", "add", &[("a", "2"), ("b", "3")])],
            },
            ProviderResponse::text("5"),
        ]);

        let invocations = Arc::new(AtomicUsize::new(0));
        let inv = Arc::clone(&invocations);
        let executor = Arc::new(FnExecutor(move |call: &ToolCall| {
            inv.fetch_add(1, Ordering::SeqCst);
            assert_eq!(call.name, "add");
            assert_eq!(call.arguments["a"], "2");
            assert_eq!(call.arguments["b"], "3");
            Ok(ToolReply {
                content: "5".into(),
                deferred: Vec::new(),
            })
        }));

        let router = router_with(provider.clone(), executor, RouterConfig::default());
        let outcome = router
            .chat(
                vec![ChatMessage::user("add 2 and 3")],
                "",
                ChatContext::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.content, "5");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        // The second provider call saw the tool reply paired to its call.
        let seen = provider.seen.lock();
        let last = seen.last().unwrap();
        let tool_msg = last.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.content, "5");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn system_prompt_carries_plugin_docs() {
        let provider = ScriptedProvider::new(vec![ProviderResponse::text("hi")]);
        let executor = Arc::new(FnExecutor(|_: &ToolCall| Ok(ToolReply::default())));
        let router = router_with(provider.clone(), executor, RouterConfig::default());

        router
            .chat(
                vec![ChatMessage::user("hello")],
                "",
                ChatContext::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let seen = provider.seen.lock();
        let system = &seen[0][0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("## Plugin: calc"));
        assert!(system.content.contains("Adds numbers."));
    }

    #[tokio::test]
    async fn skill_timeout_becomes_error_reply() {
        let provider = ScriptedProvider::new(vec![
            ProviderResponse {
                content: String::new(),
                tool_calls: vec![tool_call("t1", "slow", &[])],
            },
            ProviderResponse::text("gave up"),
        ]);

        struct NeverExecutor;

        #[async_trait]
        impl ToolExecutor for NeverExecutor {
            async fn execute(
                &self,
                _call: &ToolCall,
                _ctx: &ChatContext,
                _cancel: &CancellationToken,
            ) -> BrokerResult<ToolReply> {
                std::future::pending().await
            }
        }

        let config = RouterConfig {
            skill_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let router = router_with(provider.clone(), Arc::new(NeverExecutor), config);

        let outcome = router
            .chat(
                vec![ChatMessage::user("run slow")],
                "",
                ChatContext::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.content, "gave up");
        let seen = provider.seen.lock();
        let last = seen.last().unwrap();
        let tool_msg = last.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.starts_with("Error: "), "{}", tool_msg.content);
    }

    #[tokio::test]
    async fn plugin_disconnect_becomes_error_reply() {
        let provider = ScriptedProvider::new(vec![
            ProviderResponse {
                content: String::new(),
                tool_calls: vec![tool_call("t1", "bar", &[])],
            },
            ProviderResponse::text("ok"),
        ]);
        let executor = Arc::new(FnExecutor(|_: &ToolCall| {
            Err(BrokerError::PluginDisconnected)
        }));
        let router = router_with(provider, executor, RouterConfig::default());

        let outcome = router
            .chat(
                vec![ChatMessage::user("x")],
                "",
                ChatContext::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.content, "ok");
    }

    #[tokio::test]
    async fn cancellation_aborts_turn() {
        let provider = ScriptedProvider::new(vec![ProviderResponse {
            content: String::new(),
            tool_calls: vec![tool_call("t1", "x", &[])],
        }]);
        let executor = Arc::new(FnExecutor(|_: &ToolCall| Err(BrokerError::Cancelled)));
        let router = router_with(provider, executor, RouterConfig::default());

        let result = router
            .chat(
                vec![ChatMessage::user("x")],
                "",
                ChatContext::default(),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(RouterError::Cancelled)));
    }

    #[tokio::test]
    async fn iteration_limit_trips() {
        // Endless tool calls: the scripted provider runs dry, so hand-roll one.
        struct LoopingProvider;

        #[async_trait]
        impl Provider for LoopingProvider {
            fn name(&self) -> &str {
                "looping"
            }

            async fn chat(
                &self,
                _messages: &[ChatMessage],
                _tools: &[ToolDescriptor],
            ) -> RouterResult<ProviderResponse> {
                Ok(ProviderResponse {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "t".into(),
                        name: "again".into(),
                        arguments: Default::default(),
                    }],
                })
            }
        }

        let executor = Arc::new(FnExecutor(|_: &ToolCall| Ok(ToolReply::default())));
        let config = RouterConfig {
            max_iterations: 3,
            ..Default::default()
        };
        let router = router_with(Arc::new(LoopingProvider), executor, config);

        let result = router
            .chat(
                vec![ChatMessage::user("x")],
                "",
                ChatContext::default(),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(RouterError::IterationLimit(3))));
    }

    #[tokio::test]
    async fn oversized_results_are_truncated() {
        let provider = ScriptedProvider::new(vec![
            ProviderResponse {
                content: String::new(),
                tool_calls: vec![tool_call("t1", "big", &[])],
            },
            ProviderResponse::text("ok"),
        ]);
        let executor = Arc::new(FnExecutor(|_: &ToolCall| {
            Ok(ToolReply {
                content: "x".repeat(100),
                deferred: Vec::new(),
            })
        }));
        let config = RouterConfig {
            max_tool_result_bytes: 64,
            ..Default::default()
        };
        let router = router_with(provider.clone(), executor, config);

        router
            .chat(
                vec![ChatMessage::user("x")],
                "",
                ChatContext::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let seen = provider.seen.lock();
        let tool_msg = seen
            .last()
            .unwrap()
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(tool_msg.content.contains("[truncated: result was 100 bytes]"));
        assert!(tool_msg.content.starts_with(&"x".repeat(64)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(10); // 2 bytes each
        let out = truncate_result(s, 5);
        assert!(out.starts_with(&"é".repeat(2)));
        assert!(out.contains("result was 20 bytes"));
    }

    #[tokio::test]
    async fn deferred_attachments_are_collected() {
        let provider = ScriptedProvider::new(vec![
            ProviderResponse {
                content: String::new(),
                tool_calls: vec![tool_call("t1", "meme", &[])],
            },
            ProviderResponse::text("here you go"),
        ]);
        let executor = Arc::new(FnExecutor(|_: &ToolCall| {
            Ok(ToolReply {
                content: "sent".into(),
                deferred: vec![DeferredAttachment {
                    content: "caption".into(),
                    attachments: Vec::new(),
                }],
            })
        }));
        let router = router_with(provider, executor, RouterConfig::default());

        let outcome = router
            .chat(
                vec![ChatMessage::user("meme please")],
                "",
                ChatContext::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.deferred_attachments.len(), 1);
        assert_eq!(outcome.deferred_attachments[0].content, "caption");
    }
}
