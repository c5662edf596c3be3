//! Calculator tools: `add` and `subtract` over two numeric operands.

use mcp_protocol::CallToolResult;
use serde::Deserialize;
use serde_json::{json, Number, Value};

use crate::{RegistryError, Tool, ToolError, ToolRegistry};

/// Arguments shared by both arithmetic tools.
#[derive(Debug, Clone, Deserialize)]
pub struct Operands {
    pub a: Number,
    pub b: Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Subtract,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Add => "Add two numbers",
            Self::Subtract => "Subtract two numbers",
        }
    }

    /// Integers go through checked `i64` arithmetic; anything else is `f64`.
    pub fn apply(self, a: &Number, b: &Number) -> Result<String, ToolError> {
        if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
            let result = match self {
                Self::Add => x.checked_add(y),
                Self::Subtract => x.checked_sub(y),
            };
            return result.map(|r| r.to_string()).ok_or_else(|| ToolError::Overflow {
                operation: self.name(),
                a: a.to_string(),
                b: b.to_string(),
            });
        }

        let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
            return Err(ToolError::Failed(format!("operands {a} and {b} are not representable")));
        };
        let result = match self {
            Self::Add => x + y,
            Self::Subtract => x - y,
        };
        if !result.is_finite() {
            return Err(ToolError::NonFinite { operation: self.name() });
        }
        Ok(format_float(result))
    }
}

// 2^53: beyond this f64 no longer holds every integer exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// One arithmetic tool.
#[derive(Debug, Clone, Copy)]
pub struct Arithmetic {
    operation: Operation,
}

impl Arithmetic {
    pub fn add() -> Self {
        Self { operation: Operation::Add }
    }

    pub fn subtract() -> Self {
        Self { operation: Operation::Subtract }
    }
}

impl Tool for Arithmetic {
    type Args = Operands;

    fn name(&self) -> &str {
        self.operation.name()
    }

    fn description(&self) -> &str {
        self.operation.description()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number", "description": "First operand" },
                "b": { "type": "number", "description": "Second operand" }
            },
            "required": ["a", "b"]
        })
    }

    async fn call(&self, args: Operands) -> Result<CallToolResult, ToolError> {
        self.operation
            .apply(&args.a, &args.b)
            .map(CallToolResult::text)
    }
}

/// Registry holding the calculator's tools: `add` then `subtract`.
pub fn calculator_tools() -> Result<ToolRegistry, RegistryError> {
    Ok(ToolRegistry::builder()
        .register(Arithmetic::add())?
        .register(Arithmetic::subtract())?
        .build())
}
