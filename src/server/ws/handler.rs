use std::collections::VecDeque;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::protocol::{parse_client_frame, ClientFrame, ServerFrame};
use crate::history::QueryRecord;
use crate::query::{AnswerStream, Fragment, QueryError};
use crate::state::AppState;

type Sender = SplitSink<WebSocket, Message>;
type Inbound = Result<ClientFrame, &'static str>;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = Uuid::new_v4().to_string();
    tracing::info!("Client connected: {}", connection_id);

    let (tx, mut rx) = mpsc::unbounded_channel::<Inbound>();
    tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if tx.send(parse_client_frame(&text)).is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let mut queued: VecDeque<(String, String)> = VecDeque::new();
    loop {
        let frame = match queued.pop_front() {
            Some((document_id, question)) => Ok(ClientFrame::Query {
                document_id,
                question,
            }),
            None => match rx.recv().await {
                Some(frame) => frame,
                None => break,
            },
        };

        let result = match frame {
            Ok(ClientFrame::Query {
                document_id,
                question,
            }) => {
                run_query(&mut sender, &state, &mut rx, &mut queued, document_id, question).await
            }
            Ok(ClientFrame::Stop) => send_frame(&mut sender, ServerFrame::Stopped)
                .await
                .map(|_| Flow::Continue),
            Err(message) => send_frame(&mut sender, ServerFrame::error(message))
                .await
                .map(|_| Flow::Continue),
        };

        match result {
            Ok(Flow::Continue) => {}
            Ok(Flow::Disconnected) | Err(_) => break,
        }
    }

    tracing::info!("Client disconnected: {}", connection_id);
}

enum Flow {
    Continue,
    Disconnected,
}

enum Step {
    Item(Option<Result<Fragment, QueryError>>),
    Stop,
    Disconnected,
}

/// Streams one answer. Frames arriving meanwhile are handled inline: `stop`
/// cancels, further queries are queued, invalid ones get an error frame.
async fn run_query(
    sender: &mut Sender,
    state: &Arc<AppState>,
    rx: &mut mpsc::UnboundedReceiver<Inbound>,
    queued: &mut VecDeque<(String, String)>,
    document_id: String,
    question: String,
) -> Result<Flow, axum::Error> {
    send_frame(
        sender,
        ServerFrame::Ack {
            query_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        },
    )
    .await?;

    let mut answer_stream: AnswerStream =
        match state.orchestrator.stream(&document_id, &question).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Error processing WebSocket query: {}", e);
                send_frame(sender, ServerFrame::error(format!("Error processing query: {}", e)))
                    .await?;
                return Ok(Flow::Continue);
            }
        };

    loop {
        let step = {
            let next = answer_stream.next();
            tokio::pin!(next);
            loop {
                tokio::select! {
                    item = &mut next => break Step::Item(item),
                    incoming = rx.recv() => match incoming {
                        None => break Step::Disconnected,
                        Some(Ok(ClientFrame::Stop)) => break Step::Stop,
                        Some(Ok(ClientFrame::Query { document_id, question })) => {
                            queued.push_back((document_id, question));
                        }
                        Some(Err(message)) => {
                            send_frame(sender, ServerFrame::error(message)).await?;
                        }
                    },
                }
            }
        };

        match step {
            Step::Item(Some(Ok(fragment))) => {
                send_frame(
                    sender,
                    ServerFrame::Token {
                        content: fragment.into_text(),
                    },
                )
                .await?;
            }
            Step::Item(Some(Err(e))) => {
                tracing::error!("Error processing WebSocket query: {}", e);
                send_frame(sender, ServerFrame::error(format!("Error processing query: {}", e)))
                    .await?;
                return Ok(Flow::Continue);
            }
            Step::Item(None) => {
                if let Some(answer) = answer_stream.answer() {
                    let record = QueryRecord::new(
                        &document_id,
                        &question,
                        answer,
                        answer_stream.elapsed().as_secs_f64(),
                        answer_stream.context_chunks().to_vec(),
                    );
                    if let Err(e) = state.history.record(&record).await {
                        tracing::warn!("Failed to record query {}: {}", record.id, e);
                    }
                }
                send_frame(
                    sender,
                    ServerFrame::Complete {
                        timestamp: Utc::now().to_rfc3339(),
                    },
                )
                .await?;
                return Ok(Flow::Continue);
            }
            Step::Stop => {
                answer_stream.cancel();
                send_frame(sender, ServerFrame::Stopped).await?;
                return Ok(Flow::Continue);
            }
            Step::Disconnected => {
                answer_stream.cancel();
                return Ok(Flow::Disconnected);
            }
        }
    }
}

async fn send_frame(sender: &mut Sender, frame: ServerFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(&frame).map_err(axum::Error::new)?;
    sender.send(Message::Text(text)).await
}
