//! Gateway payment signature verification.

use domain::PaymentFields;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{FulfillmentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Checks that payment fields really came from the gateway.
pub trait PaymentVerifier: Send + Sync {
    fn verify(&self, payment: &PaymentFields) -> Result<()>;
}

/// HMAC-SHA256 over `paymentOrderId|paymentId`, hex encoded.
#[derive(Clone)]
pub struct HmacPaymentVerifier {
    secret: String,
}

impl HmacPaymentVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Produces the signature the gateway would send for these ids.
    pub fn sign(&self, payment_order_id: &str, payment_id: &str) -> Result<String> {
        let mac = self.mac(payment_order_id, payment_id)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn mac(&self, payment_order_id: &str, payment_id: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| FulfillmentError::Integrity(e.to_string()))?;
        mac.update(format!("{payment_order_id}|{payment_id}").as_bytes());
        Ok(mac)
    }
}

impl std::fmt::Debug for HmacPaymentVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacPaymentVerifier").finish_non_exhaustive()
    }
}

impl PaymentVerifier for HmacPaymentVerifier {
    fn verify(&self, payment: &PaymentFields) -> Result<()> {
        if self.secret.is_empty() {
            return Err(FulfillmentError::Integrity(
                "no payment secret configured".into(),
            ));
        }
        let signature = hex::decode(payment.signature.trim()).map_err(|e| {
            FulfillmentError::Integrity(format!("signature is not hex: {e}"))
        })?;
        self.mac(&payment.payment_order_id, &payment.payment_id)?
            .verify_slice(&signature)
            .map_err(|_| {
                FulfillmentError::Integrity(format!(
                    "signature mismatch for payment {}",
                    payment.payment_id
                ))
            })
    }
}
