//! Response envelopes returned to the caller.

use serde_json::{json, Value};

use crate::executor::ExecutionResult;
use crate::output_parser::find_json_array;

/// Turn the final execution result into the response value.
///
/// A successful run's output is searched for a JSON array (`results`),
/// else the whole output becomes the single result. When the question asks
/// for a "json array" the bare array is returned instead of an object.
///
/// # Example
///
/// ```
/// use llm_agent::envelope::format;
/// use llm_agent::executor::ExecutionResult;
/// use serde_json::json;
///
/// let run = ExecutionResult::succeeded("Answer: [4]");
/// assert_eq!(format(&run, "What is 2+2? Respond as a JSON array."), json!([4]));
///
/// let wrapped = format(&run, "What is 2+2?");
/// assert_eq!(wrapped["status"], "success");
/// assert_eq!(wrapped["results"], json!([4]));
/// ```
pub fn format(result: &ExecutionResult, questions: &str) -> Value {
    if !result.success {
        return json!({
            "status": "error",
            "questions": questions,
            "error": result.error_message(),
            "metadata": {
                "execution_success": false,
                "processing_pipeline": "failed_at_execution",
            },
        });
    }

    let results = find_json_array(&result.output)
        .unwrap_or_else(|| vec![Value::String(result.output.clone())]);

    if questions.to_lowercase().contains("json array") {
        return Value::Array(results);
    }

    json!({
        "status": "success",
        "questions": questions,
        "results": results,
        "metadata": {
            "execution_success": true,
            "processing_pipeline": "completed",
        },
    })
}

/// The envelope for a request that failed before or outside execution.
pub fn processing_failed(message: impl std::fmt::Display) -> Value {
    json!({
        "status": "error",
        "message": format!("Processing failed: {message}"),
        "results": [],
    })
}
