//! Unified error types for Arbor

use thiserror::Error;

/// Unified error type for all Arbor operations
#[derive(Error, Debug)]
pub enum ArborError {
    // Reasoning protocol errors (terminal for the node)
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Reasoning call timed out after {0}s")]
    ReasoningTimeout(u64),

    #[error("API error: {0}")]
    Api(String),

    #[error("API limit reached: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Tool errors (fed back into the conversation)
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool '{tool}' timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("Tool configuration error: {0}")]
    ToolConfiguration(String),

    #[error("Invalid tool input: {0}")]
    InvalidInput(String),

    #[error("Path validation failed: {0}")]
    PathValidation(String),

    // Budget errors
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    // Tree errors
    #[error("Depth exceeded: child of {parent} would sit at depth {requested}, max is {max}")]
    DepthExceeded {
        parent: String,
        requested: u32,
        max: u32,
    },

    #[error("Sequential constraint violation: {parent} already has running child {active_child}")]
    SequentialConstraintViolation { parent: String, active_child: String },

    #[error("Agent not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Tree error: {0}")]
    Tree(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl ArborError {
    /// Whether this error ends the node that raised it.
    ///
    /// Only protocol-level and budget-level failures terminate a node;
    /// everything else is surfaced into the conversation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::BudgetExceeded(_))
    }

    /// Whether the failed call may simply be retried on a later iteration
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ReasoningTimeout(_) | Self::ToolTimeout { .. })
    }
}

/// Result type alias using ArborError
pub type Result<T> = std::result::Result<T, ArborError>;
