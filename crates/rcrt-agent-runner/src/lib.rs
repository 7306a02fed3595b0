/*!
 * RCRT Agent Runner library surface.
 *
 * Hosts long-lived agent definitions: subscription selectors feed a
 * bounded context window, an LLM turns triggering events into structured
 * replies, and replies become breadcrumbs (chat responses, nested tool
 * requests, state updates).
 */

pub mod config;
pub mod context;
pub mod definition;
pub mod llm;
pub mod reply;
pub mod session;
pub mod worker;
