use async_trait::async_trait;
use serde_json::{json, Value};

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionTool, ChatCompletionTools,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, FunctionCall,
        FunctionObject,
    },
    Client,
};

use crate::config::DEFAULT_MODEL;
use crate::error::{Result, WealthWiseError};
use crate::interfaces::providers::{
    ChatMessage, CompletionClient, CompletionRequest, CompletionResponse, ContentBlock, Role,
    ToolSpec,
};

/// Completion adapter over the OpenAI chat API.
///
/// `tool_use` blocks travel as assistant `tool_calls`; `tool_result` blocks travel as
/// `tool` role messages carrying the same call id.
#[derive(Clone)]
pub struct OpenAiProvider {
    model: String,
    client: Client<OpenAIConfig>,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            model,
            client: Client::with_config(config),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_system_message(system_prompt: &str) -> Result<Option<ChatCompletionRequestMessage>> {
        if system_prompt.is_empty() {
            return Ok(None);
        }
        let message = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt)
            .build()
            .map_err(|e| WealthWiseError::Runtime(e.to_string()))?;
        Ok(Some(ChatCompletionRequestMessage::System(message)))
    }

    fn build_user_text_message(text: &str) -> Result<ChatCompletionRequestMessage> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Text(
                text.to_string(),
            ))
            .build()
            .map_err(|e| WealthWiseError::Runtime(e.to_string()))?;
        Ok(ChatCompletionRequestMessage::User(message))
    }

    fn from_wire(value: Value) -> Result<ChatCompletionRequestMessage> {
        serde_json::from_value(value).map_err(|e| WealthWiseError::Serialization(e.to_string()))
    }

    /// Expands one transcript message into the OpenAI message sequence.
    fn convert_message(message: &ChatMessage) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut out = Vec::new();
        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for block in &message.content {
            match block {
                ContentBlock::Text { text: part } => text.push(part.as_str()),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": input.to_string() }
                })),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => out.push(Self::from_wire(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content
                }))?),
            }
        }
        let text = text.join("\n");

        match message.role {
            Role::User => {
                if !text.is_empty() {
                    out.push(Self::build_user_text_message(&text)?);
                }
            }
            Role::Assistant => {
                let mut wire = json!({ "role": "assistant" });
                if !text.is_empty() {
                    wire["content"] = Value::String(text);
                }
                if !tool_calls.is_empty() {
                    wire["tool_calls"] = Value::Array(tool_calls);
                }
                out.push(Self::from_wire(wire)?);
            }
        }
        Ok(out)
    }

    fn convert_tools(tools: &[ToolSpec]) -> Vec<ChatCompletionTools> {
        tools
            .iter()
            .map(|tool| {
                ChatCompletionTools::Function(ChatCompletionTool {
                    function: FunctionObject {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters: Some(tool.input_schema.clone()),
                        strict: None,
                    },
                })
            })
            .collect()
    }

    fn extract_blocks(response: &CreateChatCompletionResponse) -> Result<Vec<ContentBlock>> {
        let choice = response
            .choices
            .first()
            .ok_or_else(|| WealthWiseError::Runtime("No choices returned".to_string()))?;
        let message = &choice.message;
        let mut blocks = Vec::new();
        if let Some(text) = message.content.as_ref().filter(|t| !t.is_empty()) {
            blocks.push(ContentBlock::Text { text: text.clone() });
        }

        let parse_args =
            |args: &str| serde_json::from_str(args).unwrap_or(Value::String(args.to_string()));
        if let Some(tool_calls) = &message.tool_calls {
            for call in tool_calls {
                match call {
                    ChatCompletionMessageToolCalls::Function(function_call) => {
                        blocks.push(ContentBlock::ToolUse {
                            id: function_call.id.clone(),
                            name: function_call.function.name.clone(),
                            input: parse_args(&function_call.function.arguments),
                        });
                    }
                    ChatCompletionMessageToolCalls::Custom(custom_call) => {
                        blocks.push(ContentBlock::ToolUse {
                            id: custom_call.id.clone(),
                            name: custom_call.custom_tool.name.clone(),
                            input: parse_args(&custom_call.custom_tool.input),
                        });
                    }
                }
            }
        }

        if !blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })) {
            #[allow(deprecated)]
            if let Some(FunctionCall { name, arguments }) = &message.function_call {
                blocks.push(ContentBlock::ToolUse {
                    id: format!("call_{name}"),
                    name: name.clone(),
                    input: parse_args(arguments),
                });
            }
        }
        Ok(blocks)
    }
}

#[async_trait]
impl CompletionClient for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut messages = Vec::new();
        if let Some(system) = Self::build_system_message(&request.system)? {
            messages.push(system);
        }
        for message in &request.messages {
            messages.extend(Self::convert_message(message)?);
        }

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(request.model.unwrap_or_else(|| self.model.clone()));
        builder.messages(messages);
        builder.max_completion_tokens(request.max_tokens);
        let tools = Self::convert_tools(&request.tools);
        if !tools.is_empty() {
            builder.tools(tools);
        }

        let request = builder
            .build()
            .map_err(|e| WealthWiseError::Runtime(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| WealthWiseError::Http(e.to_string()))?;

        Ok(CompletionResponse {
            content: Self::extract_blocks(&response)?,
        })
    }
}
