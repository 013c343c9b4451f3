async fn get_health() -> Json<serde_json::Value> {
    Json(json!({
        "schema_version": SCHEMA_VERSION_V1,
        "status": "ok",
    }))
}

/// Pooled wallets the user belongs to within the guild.
async fn get_affiliations(
    State(state): State<AppState>,
    Path((guild_id, user_id)): Path<(u64, u64)>,
) -> Result<Json<WalletsResponse>, HttpApiError> {
    let wallets = {
        let kernel = state.kernel.lock().await;
        kernel.wallets_for_user(user_id)?
    };

    let wallets = wallets
        .into_iter()
        .filter(|(relation, _)| relation.guild_id == guild_id)
        .map(|(relation, wallet)| WalletSummary {
            rel_id: relation.rel_id,
            wallet_id: wallet.wallet_id,
            kind: relation.kind,
            balance: wallet.balance,
        })
        .collect();

    Ok(Json(WalletsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        user_id,
        wallets,
    }))
}

async fn get_relations(
    State(state): State<AppState>,
    Path((guild_id, user_id)): Path<(u64, u64)>,
) -> Result<Json<RelationsResponse>, HttpApiError> {
    let relations = {
        let kernel = state.kernel.lock().await;
        let mut summaries = Vec::new();
        for relation in kernel.relations_for_user(guild_id, user_id)? {
            let peers = kernel
                .relation_members(&relation.rel_id)?
                .into_iter()
                .filter(|member| *member != user_id)
                .map(|member| member.to_string())
                .collect();
            summaries.push(RelationSummary {
                rel_id: relation.rel_id,
                kind: relation.kind,
                name: relation.name,
                peers,
            });
        }
        summaries
    };

    Ok(Json(RelationsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        user_id,
        relations,
    }))
}

#[derive(Debug, Deserialize, Default)]
struct TreeQuery {
    theme: Option<String>,
    rtl: Option<bool>,
    avatars: Option<bool>,
}

/// Layout for the external tree renderer; the family key is an id or a
/// case-insensitive name.
async fn get_family_tree(
    State(state): State<AppState>,
    Path((guild_id, key)): Path<(u64, String)>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<TreeLayout>, HttpApiError> {
    let options = TreeOptions {
        theme: query.theme,
        rtl: query.rtl,
        avatars: query.avatars,
    };
    let layout = {
        let kernel = state.kernel.lock().await;
        kernel.tree_layout(guild_id, &key, &options)?
    };
    Ok(Json(layout))
}
