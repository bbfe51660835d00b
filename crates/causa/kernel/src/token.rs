//! Capability Token Service.
//!
//! Tokens are the only way across the execution boundary. Each one binds a
//! single (proposal hash, trace hash, scope hash) triple, expires after a
//! fixed number of logical ticks and can be redeemed once.

use std::collections::BTreeSet;

use causa_crypto::{hash_serialize, to_canonical_bytes, KernelSecret};
use causa_types::{scope_hash, CapabilityToken, DenialReason, ExecutionRequest, ViolationCode};
use serde_json::json;

use crate::error::Result;

pub struct TokenService {
    secret: KernelSecret,
    ttl_ticks: u64,
    issued: u64,
    redeemed: BTreeSet<String>,
}

impl TokenService {
    /// The secret is scoped to one run and owned by this service.
    pub fn new(secret: KernelSecret, ttl_ticks: u64) -> Self {
        Self {
            secret,
            ttl_ticks,
            issued: 0,
            redeemed: BTreeSet::new(),
        }
    }

    pub fn issued_count(&self) -> u64 {
        self.issued
    }

    /// Issue a token for an admitted proposal at logical `tick`.
    pub fn issue(
        &mut self,
        proposal_hash: &str,
        trace_hash: &str,
        scope: &[String],
        tick: u64,
    ) -> Result<CapabilityToken> {
        let issuance_count = self.issued + 1;
        let scope_hash = scope_hash(scope)?;
        let token_id = hash_serialize(&json!({
            "proposal_hash": proposal_hash,
            "trace_hash": trace_hash,
            "scope_hash": scope_hash,
            "issued_at": tick,
            "issuance_count": issuance_count,
        }))?;

        let mut token = CapabilityToken {
            token_id,
            proposal_hash: proposal_hash.to_string(),
            trace_hash: trace_hash.to_string(),
            scope_hash,
            issued_at: tick,
            expires_at: tick.saturating_add(self.ttl_ticks),
            issuance_count,
            signature: String::new(),
        };
        token.signature = self.sign(&token)?;
        self.issued = issuance_count;
        Ok(token)
    }

    fn sign(&self, token: &CapabilityToken) -> Result<String> {
        let bytes = to_canonical_bytes(&token.unsigned_value()?)?;
        Ok(self.secret.sign(&bytes)?)
    }

    /// Check signature, binding triple, expiry and prior redemption without
    /// consuming the token.
    pub fn verify(
        &self,
        token: &CapabilityToken,
        request: &ExecutionRequest,
    ) -> std::result::Result<(), DenialReason> {
        let expected = self.sign(token).map_err(|e| {
            DenialReason::new(ViolationCode::TokenSignature, format!("token could not be encoded: {e}"))
        })?;
        if expected != token.signature {
            return Err(DenialReason::new(
                ViolationCode::TokenSignature,
                format!("signature of token {} does not verify", token.token_id),
            ));
        }

        let request_scope = scope_hash(&request.scope).map_err(|e| {
            DenialReason::new(ViolationCode::I4TokenBinding, format!("scope could not be encoded: {e}"))
        })?;
        let mismatched = [
            ("proposal_hash", &token.proposal_hash, &request.proposal_hash),
            ("trace_hash", &token.trace_hash, &request.trace_hash),
            ("scope_hash", &token.scope_hash, &request_scope),
        ]
        .into_iter()
        .filter(|(_, bound, requested)| bound != requested)
        .map(|(name, _, _)| name)
        .collect::<Vec<_>>();
        if !mismatched.is_empty() {
            return Err(DenialReason::new(
                ViolationCode::I4TokenBinding,
                format!("token is not bound to this request ({} differ)", mismatched.join(", ")),
            ));
        }

        if request.tick < token.issued_at || request.tick > token.expires_at {
            return Err(DenialReason::new(
                ViolationCode::TokenExpired,
                format!(
                    "tick {} outside validity [{}, {}]",
                    request.tick, token.issued_at, token.expires_at
                ),
            ));
        }

        if self.redeemed.contains(&token.token_id) {
            return Err(DenialReason::new(
                ViolationCode::TokenReused,
                format!("token {} already redeemed", token.token_id),
            ));
        }
        Ok(())
    }

    /// Decide an execution request. No token is a denial, never an error.
    pub fn authorize(
        &mut self,
        token: Option<&CapabilityToken>,
        request: &ExecutionRequest,
    ) -> std::result::Result<(), DenialReason> {
        match token {
            Some(token) => self.redeem(token, request),
            None => Err(DenialReason::new(
                ViolationCode::TokenMissing,
                "no capability token presented",
            )),
        }
    }

    /// Verify and consume. A token redeems at most once.
    pub fn redeem(
        &mut self,
        token: &CapabilityToken,
        request: &ExecutionRequest,
    ) -> std::result::Result<(), DenialReason> {
        self.verify(token, request)?;
        self.redeemed.insert(token.token_id.clone());
        Ok(())
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl_ticks", &self.ttl_ticks)
            .field("issued", &self.issued)
            .field("redeemed", &self.redeemed.len())
            .finish()
    }
}

/// Reason recorded for every use of the direct-execution path.
pub fn bypass_denial() -> DenialReason {
    DenialReason::new(
        ViolationCode::TokenMissing,
        "direct execution bypasses the token boundary",
    )
}
