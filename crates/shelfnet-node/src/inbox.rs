//! Answers collected for this node's own requests.

use shelfnet_store::{BookRequest, Database, StoredResponseBook};

use crate::error::Result;

/// One book a peer offered in reply to our request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub responder: String,
    pub book: StoredResponseBook,
    /// Annotation of the same file in the local catalog, if we hold it.
    pub local_annotation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    pub request: BookRequest,
    pub offers: Vec<Offer>,
}

/// Our newest `limit` requests, each with every book offered for it.
pub fn own_request_summaries(
    db: &Database,
    own_pubkey: &str,
    limit: u32,
) -> Result<Vec<RequestSummary>> {
    let mut summaries = Vec::new();
    for request in db.own_requests(own_pubkey, limit)? {
        let mut offers = Vec::new();
        for response in db.responses_for_request(&request.event_id)? {
            for book in db.response_books(&response.event_id)? {
                let local_annotation = db.annotation_for_hash(&book.file_hash)?;
                offers.push(Offer {
                    responder: response.responder_pubkey.clone(),
                    book,
                    local_annotation,
                });
            }
        }
        summaries.push(RequestSummary { request, offers });
    }
    Ok(summaries)
}
