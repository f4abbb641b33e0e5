//! HTTP gateway path grammar (§6.1, §8 P9/S5): `/gateway/<actor-id>[@<token>]/<rest>`.
//!
//! Grounded on `engine/packages/guard/src/routing/mod.rs::parse_actor_path`, adapted to
//! only the `@token` spelling — §9's Open Questions section explicitly states this spec
//! adopts that form over the older `/gateway/actors/<id>/tokens/<tok>/route/<rest>`
//! spelling, so the dual-form fallback the teacher's version supports isn't carried over.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorPathInfo {
	pub actor_id: String,
	pub token: Option<String>,
	pub remaining_path: String,
}

/// Parses `path` per §6.1's grammar. Returns `None` for anything malformed: missing
/// `/gateway/` prefix, empty actor-id or token, double slashes, or a capitalized
/// `Gateway` segment (the grammar is lowercase-only).
pub fn parse_actor_path(path: &str) -> Option<ActorPathInfo> {
	let fragment_pos = path.find('#');
	let without_fragment = match fragment_pos {
		Some(pos) => &path[..pos],
		None => path,
	};

	let query_pos = without_fragment.find('?');
	let query_string = match query_pos {
		Some(pos) => &without_fragment[pos..],
		None => "",
	};
	let base_path = match query_pos {
		Some(pos) => &without_fragment[..pos],
		None => without_fragment,
	};

	if base_path.contains("//") {
		return None;
	}

	let segments: Vec<&str> = base_path.split('/').filter(|s| !s.is_empty()).collect();
	if segments.len() < 2 {
		return None;
	}
	if segments[0] != "gateway" {
		return None;
	}

	let actor_id_segment = segments[1];
	if actor_id_segment.is_empty() {
		return None;
	}

	let (actor_id, token) = if let Some(at_pos) = actor_id_segment.find('@') {
		let aid = &actor_id_segment[..at_pos];
		let tok = &actor_id_segment[at_pos + 1..];
		if aid.is_empty() || tok.is_empty() {
			return None;
		}
		let decoded_aid = urlencoding::decode(aid).ok()?.to_string();
		let decoded_tok = urlencoding::decode(tok).ok()?.to_string();
		(decoded_aid, Some(decoded_tok))
	} else {
		let decoded_aid = urlencoding::decode(actor_id_segment).ok()?.to_string();
		(decoded_aid, None)
	};

	// "/gateway/{actor_id_segment}" consumed; everything after becomes remainingPath.
	let prefix_len = 1 + segments[0].len() + 1 + segments[1].len();
	let remaining_base = if prefix_len < base_path.len() { &base_path[prefix_len..] } else { "" };

	let remaining_path = if remaining_base.starts_with('/') {
		format!("{remaining_base}{query_string}")
	} else {
		format!("/{remaining_base}{query_string}")
	};

	Some(ActorPathInfo { actor_id, token, remaining_path })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plain_actor_id_with_no_token() {
		let info = parse_actor_path("/gateway/room-42/api").unwrap();
		assert_eq!(info.actor_id, "room-42");
		assert_eq!(info.token, None);
		assert_eq!(info.remaining_path, "/api");
	}

	#[test]
	fn percent_encoded_actor_and_token_with_query_and_fragment() {
		// §8 S5.
		let info = parse_actor_path("/gateway/actor%2D123@token%2D9/api?q=1#f").unwrap();
		assert_eq!(info.actor_id, "actor-123");
		assert_eq!(info.token, Some("token-9".to_string()));
		assert_eq!(info.remaining_path, "/api?q=1");
	}

	#[test]
	fn missing_remaining_path_segment_defaults_to_root() {
		let info = parse_actor_path("/gateway/room-42").unwrap();
		assert_eq!(info.remaining_path, "/");
	}

	#[test]
	fn rejects_double_slashes() {
		assert!(parse_actor_path("/gateway//room-42/api").is_none());
	}

	#[test]
	fn rejects_capitalized_gateway_segment() {
		assert!(parse_actor_path("/Gateway/room-42/api").is_none());
	}

	#[test]
	fn rejects_empty_actor_id_or_token() {
		assert!(parse_actor_path("/gateway/@token/api").is_none());
		assert!(parse_actor_path("/gateway/room@/api").is_none());
	}

	#[test]
	fn rejects_non_gateway_paths() {
		assert!(parse_actor_path("/other/room-42/api").is_none());
		assert!(parse_actor_path("/gateway").is_none());
	}
}
