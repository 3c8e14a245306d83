//! 请求的结算端与等待端

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::types::{Response, TranslationRequest, TranslationResponse};

type Settlement = TranslationResult<TranslationResponse>;

/// 调用方持有的翻译结果凭据
///
/// 可以直接 `.await`；调度器被丢弃而请求未结算时得到 [`TranslationError::Closed`]。
#[derive(Debug)]
pub struct TranslationTicket {
    receiver: oneshot::Receiver<Settlement>,
}

impl TranslationTicket {
    /// 已经失败的凭据
    pub fn rejected(error: TranslationError) -> Self {
        let (entry, ticket) = PendingRequest::detached();
        let _ = entry.send(Err(error));
        ticket
    }
}

impl Future for TranslationTicket {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(TranslationError::Closed)))
    }
}

/// 排队中的请求及其结算端
#[derive(Debug)]
pub struct PendingRequest {
    request: TranslationRequest,
    responder: oneshot::Sender<Settlement>,
}

impl PendingRequest {
    pub fn new(request: TranslationRequest) -> (Self, TranslationTicket) {
        let (responder, receiver) = oneshot::channel();
        (
            Self { request, responder },
            TranslationTicket { receiver },
        )
    }

    fn detached() -> (oneshot::Sender<Settlement>, TranslationTicket) {
        let (responder, receiver) = oneshot::channel();
        (responder, TranslationTicket { receiver })
    }

    pub fn request(&self) -> &TranslationRequest {
        &self.request
    }

    pub fn is_cancelled(&self) -> bool {
        self.request.is_cancelled()
    }

    /// 调用方已经放弃等待
    pub fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }

    pub fn resolve(self, response: Response) {
        let settled = TranslationResponse::new(self.request, response);
        let _ = self.responder.send(Ok(settled));
    }

    pub fn reject(self, error: TranslationError) {
        let _ = self.responder.send(Err(error));
    }

    /// 以 `Removed` 拒绝，错误中携带原始请求
    pub fn remove(self) {
        let error = TranslationError::Removed {
            request: Box::new(self.request),
        };
        let _ = self.responder.send(Err(error));
    }
}
