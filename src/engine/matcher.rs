// Rule matcher: walk a cell's variants in order, short-circuit on the
// first variant whose every validator passes
//
// A validator returning a message ends its variant and records the
// message; it does not end the walk. Only when every variant has failed
// do the accumulated errors become the outcome — a matched variant
// discards them all.

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::accessor::DocumentAccessor;
use crate::errors::GateResult;
use crate::models::{DataRequest, ValidateError, ValidateOutcome};

use super::compiler::{CompiledVariant, PermissionTable};
use super::validators::{InjectionMap, ValidationContext};

/// Match one request against the table.
///
/// Structural failures (`type: 0`) are checked in a fixed order:
/// unknown collection, then unknown action token, then a cell with no
/// rules. Only then does the variant walk begin.
pub async fn validate_request(
    table: &PermissionTable,
    request: &mut DataRequest,
    injections: &InjectionMap,
    accessor: &dyn DocumentAccessor,
    cancel: &CancellationToken,
) -> GateResult<ValidateOutcome> {
    let collection = request.collection.clone();
    if !table.has_collection(&collection) {
        return Ok(denied_structural(format!(
            "collection \"{collection}\" not found"
        )));
    }

    let Some(action) = request.resolve_action() else {
        let token = &request.action;
        return Ok(denied_structural(format!("action \"{token}\" invalid")));
    };

    let Some(variants) = table.variants(&collection, action.permission_name()) else {
        let token = &request.action;
        return Ok(denied_structural(format!(
            "{collection} {token} don't has any rules"
        )));
    };

    let mut ctx = ValidationContext {
        request,
        action,
        injections,
        accessor,
        cancel,
    };
    walk_variants(variants, &mut ctx).await
}

/// Match a request against one collection's `$schema` pseudo-permission.
pub async fn validate_schema(
    table: &PermissionTable,
    collection: &str,
    request: &mut DataRequest,
    injections: &InjectionMap,
    accessor: &dyn DocumentAccessor,
    cancel: &CancellationToken,
) -> GateResult<ValidateOutcome> {
    use super::compiler::SCHEMA_PERMISSION;

    if !table.has_collection(collection) {
        return Ok(denied_structural(format!(
            "collection \"{collection}\" not found"
        )));
    }

    let Some(action) = request.resolve_action() else {
        let token = &request.action;
        return Ok(denied_structural(format!("action \"{token}\" invalid")));
    };

    let Some(variants) = table.variants(collection, SCHEMA_PERMISSION) else {
        return Ok(denied_structural(format!(
            "{collection} {SCHEMA_PERMISSION} don't has any rules"
        )));
    };

    let mut ctx = ValidationContext {
        request,
        action,
        injections,
        accessor,
        cancel,
    };
    walk_variants(variants, &mut ctx).await
}

fn denied_structural(message: String) -> ValidateOutcome {
    ValidateOutcome::Denied {
        errors: vec![ValidateError::structural(message)],
    }
}

/// The first-wins walk over compiled variants.
///
/// Within a variant, processors run strictly sequentially in registration
/// order so short-circuit semantics hold; across variants, errors
/// accumulate in discovery order.
async fn walk_variants(
    variants: &[CompiledVariant],
    ctx: &mut ValidationContext<'_>,
) -> GateResult<ValidateOutcome> {
    let mut errors = Vec::new();

    for (index, variant) in variants.iter().enumerate() {
        let mut variant_error = None;

        for processor in &variant.processors {
            let result = processor
                .handler
                .check(processor.config.as_ref(), ctx)
                .await?;
            if let Some(message) = result {
                trace!(
                    variant = index,
                    validator = processor.name.as_str(),
                    message = message.as_str(),
                    "variant rejected"
                );
                variant_error = Some(ValidateError::validator(processor.name.clone(), message));
                break;
            }
        }

        match variant_error {
            None => {
                debug!(
                    collection = ctx.request.collection.as_str(),
                    action = ctx.request.action.as_str(),
                    variant = index,
                    "request matched"
                );
                return Ok(ValidateOutcome::Matched {
                    matched: variant.source.clone(),
                });
            }
            Some(error) => errors.push(error),
        }
    }

    debug!(
        collection = ctx.request.collection.as_str(),
        action = ctx.request.action.as_str(),
        errors = errors.len(),
        "request denied"
    );
    Ok(ValidateOutcome::Denied { errors })
}
