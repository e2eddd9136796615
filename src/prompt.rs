use crate::config::roles::RoleConfig;
use crate::models::chat::ChatMessage;

const SYSTEM_TEMPLATE: &str = r#"你是一个专业的沟通翻译助手。现在有一段从【{source_name}】视角描述的内容，请你将其转换为【{target_name}】关注的视角来重新表述。

## 原角色视角：{source_name}

{source_prompt}

## 目标角色视角：{target_name}

{target_prompt}

## 转换要求

**重要约束**：
- 只做视角转换和翻译，**允许基于视角添加适当的建议、想法或扩展内容，但不能过多**
- 要结合实际的业务场景进行转换，不能仅仅是字面意思的转换

请根据以上两个角色的关注点，将以下内容从【{target_name}】的视角重新表述：
- 深入理解原文内容的核心要点
- 从目标角色的关注角度重新组织和表述
- 保持信息的准确性和完整性
- 使用符合目标角色习惯的表达方式
- 以 markdown 格式输出

## 示例

**示例 1：从产品经理视角翻译到研发视角**

**输入（产品经理视角）**：
我们需要一个智能推荐功能，提升用户停留时长

**输出（研发视角应包含）**：
- 推荐算法类型建议（协同过滤/内容推荐等）
- 数据来源和处理方式
- 性能和实时性要求
- 预估开发工作量

**示例 2：从研发视角翻译到产品经理视角**

**输入（研发视角）**：
我们优化了数据库查询，QPS提升了30%

**输出（产品经理视角应包含）**：
- 对用户体验的实际影响
- 支持的业务增长空间
- 成本降低的商业价值"#;

const USER_TEMPLATE: &str = r#"## 原始内容

{content}

## 转换后的内容

请从【{target_name}】的视角重新表述上述内容："#;

/// System and user prompt for one conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn into_messages(self) -> Vec<ChatMessage> {
        vec![ChatMessage::system(self.system), ChatMessage::user(self.user)]
    }
}

/// Fills `{key}` placeholders in one left-to-right pass. Inserted values are
/// never scanned again, so braces inside them stay literal. Unknown keys are
/// left as written.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let hit = tail.find('}').and_then(|end| {
            let key = &tail[1..end];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (end, *value))
        });
        match hit {
            Some((end, value)) => {
                out.push_str(value);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Builds the role-conditioned prompt. `content` is embedded verbatim.
pub fn build_prompt(source: &RoleConfig, target: &RoleConfig, content: &str) -> Prompt {
    let system = fill(SYSTEM_TEMPLATE, &[
        ("source_name", source.display_name.as_str()),
        ("target_name", target.display_name.as_str()),
        ("source_prompt", source.perspective_text.as_str()),
        ("target_prompt", target.perspective_text.as_str()),
    ]);
    let user = fill(USER_TEMPLATE, &[
        ("target_name", target.display_name.as_str()),
        ("content", content),
    ]);

    Prompt { system, user }
}
