use crate::error::Error;
use crate::message_store::{ImageStore, MessageStore};
use crate::messages::{Model, NewMessage};
use crate::UserId;
use events::{DomainEvent, EventPublisher};
use log::*;
use serde::{Deserialize, Serialize};

/// What a client submits when sending a message.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SendParams {
    pub text: Option<String>,
    /// Raw image payload (data URL or URL) to hand to the image store
    pub image: Option<String>,
}

impl SendParams {
    /// Blank text counts as no text. A message needs text, an image, or both.
    fn validate(self, max_text_len: usize) -> Result<(Option<String>, Option<String>), Error> {
        let text = self.text.filter(|text| !text.trim().is_empty());
        let image = self.image.filter(|image| !image.trim().is_empty());

        if text.is_none() && image.is_none() {
            warn!("Rejecting message without text or image");
            return Err(Error::invalid());
        }

        if let Some(text) = &text {
            if text.chars().count() > max_text_len {
                warn!(
                    "Rejecting message text of {} characters (max {max_text_len})",
                    text.chars().count()
                );
                return Err(Error::invalid());
            }
        }

        Ok((text, image))
    }
}

/// Persist a message and then announce it.
///
/// The image (if any) is uploaded and the record stored before the
/// `MessageCreated` event is published, so every delivered event refers to
/// durable data. Delivery itself is fire-and-forget.
pub async fn send(
    store: &dyn MessageStore,
    images: &dyn ImageStore,
    publisher: &EventPublisher,
    sender_id: UserId,
    receiver_id: UserId,
    params: SendParams,
    max_text_len: usize,
) -> Result<Model, Error> {
    let (text, image) = params.validate(max_text_len)?;

    let image = match image {
        Some(image) => {
            debug!("Uploading image for message from {sender_id} to {receiver_id}");
            let reference = images.upload(&image).await.map_err(|e| {
                error!("Failed to upload image: {e}");
                e
            })?;
            Some(reference)
        }
        None => None,
    };

    let message = store
        .save(NewMessage {
            sender_id,
            receiver_id,
            text,
            image,
        })
        .await?;

    info!(
        "Message {} saved from {} to {}",
        message.id, message.sender_id, message.receiver_id
    );

    announce_created(publisher, &message, &message).await;

    Ok(message)
}

/// Publish `MessageCreated` for a stored message.
///
/// The message is already durable at this point, so a record that cannot be
/// encoded is logged and not announced rather than failing the send.
async fn announce_created<R: Serialize>(publisher: &EventPublisher, message: &Model, record: &R) {
    let record = match serde_json::to_value(record) {
        Ok(record) => record,
        Err(e) => {
            error!("Failed to encode message {} for delivery: {e}", message.id);
            return;
        }
    };

    publisher
        .publish(DomainEvent::MessageCreated {
            message_id: message.id,
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            message: record,
        })
        .await;
}

/// The conversation between `user_id` and `other_user_id`, oldest first.
pub async fn find_conversation(
    store: &dyn MessageStore,
    user_id: &str,
    other_user_id: &str,
) -> Result<Vec<Model>, Error> {
    store.find_conversation(user_id, other_user_id).await
}
