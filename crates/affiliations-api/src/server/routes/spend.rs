/// Mixed-source debit for the external economy service: pooled wallets
/// first, personal balance for the remainder.
async fn post_spend(
    State(state): State<AppState>,
    Json(request): Json<SpendRequest>,
) -> Result<Json<SpendResponse>, HttpApiError> {
    let prefer_type = parse_prefer_type(request.prefer_type.as_deref())?;

    let source = {
        let mut kernel = state.kernel.lock().await;
        kernel
            .spend_pool_then_personal(
                request.guild_id,
                request.user_id,
                request.amount,
                prefer_type,
            )
            .await?
    };

    info!(
        guild_id = request.guild_id,
        user_id = request.user_id,
        amount = request.amount,
        %source,
        "spend covered"
    );
    Ok(Json(SpendResponse::covered(source)))
}
