// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 舵机控制板指令格式
//!
//! `P<pan>T<tilt>\n`, 角度保留一位小数, 例如 `P90.0T88.3\n`. 无应答.

/// 编码一条绝对角度指令
pub fn encode(pan: f64, tilt: f64) -> String {
    format!("P{:.1}T{:.1}\n", pan, tilt)
}

/// 解析指令 (录制链路与调试使用)
pub fn decode(line: &str) -> Option<(f64, f64)> {
    let body = line.trim_end_matches(&['\r', '\n'][..]).strip_prefix('P')?;
    let (pan, tilt) = body.split_once('T')?;
    Some((pan.parse().ok()?, tilt.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_one_decimal() {
        assert_eq!(encode(90.0, 88.3), "P90.0T88.3\n");
        assert_eq!(encode(0.04, 179.96), "P0.0T180.0\n");
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode("P90.0T88.3\n"), Some((90.0, 88.3)));
        assert_eq!(decode("P1.5T2.0"), Some((1.5, 2.0)));
        assert_eq!(decode("X90T90\n"), None);
        assert_eq!(decode("P90.0\n"), None);
    }
}
