use std::{io::IsTerminal, pin::Pin, sync::Arc};

use tokio::{
    io::{self, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

const PROMPT: &str = "> ";

type Output = Pin<Box<dyn AsyncWrite + Send>>;

/// Terminal output shared by the send and receive loops.
///
/// Every write goes through one mutex so a notice arriving mid-prompt never
/// tears another line. Prompts are only drawn when stdin is a terminal.
#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<Output>>,
    interactive: bool,
}

impl Console {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), std::io::stdin().is_terminal())
    }

    pub fn new<W>(writer: W, interactive: bool) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            out: Arc::new(Mutex::new(Box::pin(writer))),
            interactive,
        }
    }

    pub async fn line(&self, text: &str) -> io::Result<()> {
        self.write(format!("{text}\n")).await
    }

    /// Prints a message that arrived while the user may be typing.
    pub async fn notice(&self, text: &str) -> io::Result<()> {
        if self.interactive {
            self.write(format!("\n{text}\n")).await
        } else {
            self.line(text).await
        }
    }

    pub async fn prompt(&self) -> io::Result<()> {
        if !self.interactive {
            return Ok(());
        }
        self.write(PROMPT.to_string()).await
    }

    async fn write(&self, text: String) -> io::Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes()).await?;
        out.flush().await
    }
}
